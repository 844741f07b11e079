//! Google Gemini provider adapter (`generateContent` API).
//!
//! Gemini differs from the other adapters in two ways: model validation is
//! warn-only (the API validates), and a blocked or truncated candidate may
//! carry no text at all. In that case the adapter returns an empty content
//! string with the correct finish reason and whatever usage metadata the
//! response carried, instead of failing.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{longest_prefix_match, AiError, AiProvider, AiResponse, FinishReason, GenerationConfig};

/// Per-1M-token (input, output) pricing, longest-match indexed.
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("gemini-2.5-pro", 1.25, 5.0),
    ("gemini-2.5-flash", 0.075, 0.3),
    ("gemini-2.5-flash-lite", 0.0375, 0.15),
    ("gemini-2.0-flash", 0.0, 0.0),
    ("gemini-2.0-flash-lite", 0.0, 0.0),
    ("gemini-1.5-pro", 1.25, 5.0),
    ("gemini-1.5-flash", 0.075, 0.3),
    ("gemini-1.5-flash-8b", 0.0375, 0.15),
    ("gemini-1.0-pro", 0.5, 1.5),
    ("gemini-pro", 0.5, 1.5),
];

const CONTEXT_WINDOWS: &[(&str, u32)] = &[
    ("gemini-2.5-pro", 1_048_576),
    ("gemini-2.5-flash", 1_048_576),
    ("gemini-2.0-flash", 1_048_576),
    ("gemini-1.5-pro", 2_097_152),
    ("gemini-1.5-flash", 1_048_576),
    ("gemini-1.0-pro", 32_768),
    ("gemini-pro", 32_768),
];

const AVAILABLE_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-1.5-pro",
    "gemini-1.5-flash",
    "gemini-1.5-flash-8b",
    "gemini-1.0-pro",
    "gemini-pro",
];

#[derive(Debug)]
pub struct GeminiProvider {
    api_key: String,
    default_model: String,
    client: Client,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, default_model: Option<String>) -> Result<Self, AiError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AiError::Authentication {
                provider: "gemini".into(),
                message: "API key is empty or invalid".into(),
            });
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| AiError::Unknown {
                provider: "gemini".into(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            api_key,
            default_model: default_model.unwrap_or_else(|| "gemini-2.0-flash-lite".to_string()),
            client,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            model
        )
    }

    fn map_error_status(status: reqwest::StatusCode, body: &str) -> AiError {
        let message = body.chars().take(300).collect::<String>();
        match status.as_u16() {
            429 => AiError::RateLimit {
                provider: "gemini".into(),
                message,
                retry_after: None,
            },
            401 | 403 => AiError::Authentication {
                provider: "gemini".into(),
                message,
            },
            400 | 404 => AiError::InvalidRequest {
                provider: "gemini".into(),
                message,
            },
            s if s >= 500 => AiError::ServiceUnavailable {
                provider: "gemini".into(),
                message,
            },
            _ => AiError::Unknown {
                provider: "gemini".into(),
                message,
            },
        }
    }

    /// Gemini finish reasons arrive as enum names; legacy responses may use
    /// the numeric wire values.
    fn map_finish_reason(raw: Option<&str>) -> Option<FinishReason> {
        let raw = raw?;
        let mapped = match raw {
            "STOP" | "1" => FinishReason::Stop,
            "MAX_TOKENS" | "2" => FinishReason::MaxTokens,
            "SAFETY" | "3" => FinishReason::Safety,
            "RECITATION" | "4" => FinishReason::Recitation,
            "FINISH_REASON_UNSPECIFIED" | "0" => return None,
            _ => FinishReason::Other,
        };
        Some(mapped)
    }
}

#[derive(Deserialize, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u32,
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn provider_name(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn available_models(&self) -> &[&'static str] {
        AVAILABLE_MODELS
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        config: &GenerationConfig,
        model: Option<&str>,
    ) -> Result<AiResponse, AiError> {
        let start = Instant::now();
        config.validate("gemini")?;
        let model = model.unwrap_or(&self.default_model);
        if !self.supports_model(model) {
            tracing::warn!(model, "model not in known list, letting the API validate");
        }

        // Gemini has no separate system slot on this endpoint; prepend it.
        let full_prompt = match system_prompt {
            Some(system) => format!("{system}\n\n{prompt}"),
            None => prompt.to_string(),
        };

        let request = json!({
            "contents": [{"parts": [{"text": full_prompt}]}],
            "generationConfig": {
                "temperature": config.temperature,
                "topP": config.top_p,
                "maxOutputTokens": config.max_tokens,
                "stopSequences": config.stop_sequences,
            }
        });

        tracing::debug!(model, max_tokens = config.max_tokens, "gemini request");

        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout {
                        provider: "gemini".into(),
                        message: e.to_string(),
                    }
                } else {
                    AiError::ServiceUnavailable {
                        provider: "gemini".into(),
                        message: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_error_status(status, &body));
        }

        let parsed: GenerateContentResponse =
            response.json().await.map_err(|e| AiError::Unknown {
                provider: "gemini".into(),
                message: format!("failed to decode response: {e}"),
            })?;

        let mut content = String::new();
        let mut finish_reason = None;
        if let Some(candidate) = parsed.candidates.first() {
            finish_reason = Self::map_finish_reason(candidate.finish_reason.as_deref());
            if let Some(candidate_content) = &candidate.content {
                for part in &candidate_content.parts {
                    content.push_str(&part.text);
                }
            }
        }

        let usage = parsed.usage_metadata.unwrap_or_default();
        if content.is_empty() && finish_reason == Some(FinishReason::MaxTokens) {
            tracing::warn!(
                completion_tokens = usage.candidates_token_count,
                max_output_tokens = config.max_tokens,
                "gemini response truncated before any text was emitted"
            );
        }

        Ok(AiResponse {
            content,
            model: model.to_string(),
            provider: "gemini".into(),
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
            estimated_cost: self.estimate_cost(
                usage.prompt_token_count,
                usage.candidates_token_count,
                Some(model),
            ),
            finish_reason,
            latency_ms: start.elapsed().as_millis() as u64,
            created_at: Utc::now(),
        })
    }

    fn estimate_cost(
        &self,
        prompt_tokens: u32,
        completion_tokens: u32,
        model: Option<&str>,
    ) -> f64 {
        let model = model.unwrap_or(&self.default_model);
        let table: Vec<(&'static str, (f64, f64))> = MODEL_PRICING
            .iter()
            .map(|(k, i, o)| (*k, (*i, *o)))
            .collect();
        let (input_rate, output_rate) = longest_prefix_match(model, &table)
            .copied()
            .unwrap_or_else(|| {
                tracing::warn!(model, "no pricing for model, defaulting to 1.5-flash rates");
                (0.075, 0.3)
            });
        let cost = (prompt_tokens as f64 / 1_000_000.0) * input_rate
            + (completion_tokens as f64 / 1_000_000.0) * output_rate;
        (cost * 1e6).round() / 1e6
    }

    fn context_window(&self, model: Option<&str>) -> u32 {
        let model = model.unwrap_or(&self.default_model);
        longest_prefix_match(model, CONTEXT_WINDOWS)
            .copied()
            .unwrap_or(1_048_576)
    }

    fn pricing_table(&self) -> &[(&'static str, f64, f64)] {
        MODEL_PRICING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_enum_and_numeric_forms() {
        assert_eq!(
            GeminiProvider::map_finish_reason(Some("MAX_TOKENS")),
            Some(FinishReason::MaxTokens)
        );
        assert_eq!(
            GeminiProvider::map_finish_reason(Some("2")),
            Some(FinishReason::MaxTokens)
        );
        assert_eq!(
            GeminiProvider::map_finish_reason(Some("SAFETY")),
            Some(FinishReason::Safety)
        );
        assert_eq!(GeminiProvider::map_finish_reason(Some("0")), None);
        assert_eq!(GeminiProvider::map_finish_reason(None), None);
    }

    #[test]
    fn blocked_candidate_decodes_to_empty_content() {
        // SAFETY blocks omit content entirely; the adapter must not error.
        let raw = r#"{
            "candidates": [{"finishReason": "SAFETY"}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 0, "totalTokenCount": 12}
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let candidate = parsed.candidates.first().unwrap();
        assert!(candidate.content.is_none());
        assert_eq!(
            GeminiProvider::map_finish_reason(candidate.finish_reason.as_deref()),
            Some(FinishReason::Safety)
        );
        assert_eq!(parsed.usage_metadata.unwrap().prompt_token_count, 12);
    }

    #[test]
    fn flash_pricing() {
        let provider = GeminiProvider::new("AIza-test", None).unwrap();
        assert_eq!(
            provider.estimate_cost(1_000_000, 1_000_000, Some("gemini-1.5-flash")),
            0.375
        );
        // Preview 2.0 models are free.
        assert_eq!(
            provider.estimate_cost(1_000_000, 1_000_000, Some("gemini-2.0-flash")),
            0.0
        );
    }
}
