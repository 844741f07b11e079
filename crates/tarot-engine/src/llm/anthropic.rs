//! Anthropic Claude provider adapter (messages API).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{longest_prefix_match, AiError, AiProvider, AiResponse, FinishReason, GenerationConfig};

const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Per-1M-token (input, output) pricing, longest-match indexed.
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("claude-3-opus-20240229", 15.0, 75.0),
    ("claude-3-sonnet-20240229", 3.0, 15.0),
    ("claude-3-haiku-20240307", 0.25, 1.25),
    ("claude-3-5-sonnet-20241022", 3.0, 15.0),
    ("claude-3-5-sonnet-20240620", 3.0, 15.0),
    ("claude-sonnet-4-5-20250929", 4.0, 20.0),
    ("claude-haiku-4-5-20251001", 1.0, 3.0),
    ("claude-3-opus", 15.0, 75.0),
    ("claude-3-sonnet", 3.0, 15.0),
    ("claude-3-haiku", 0.25, 1.25),
    ("claude-3-5-sonnet", 3.0, 15.0),
];

const AVAILABLE_MODELS: &[&str] = &[
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
    "claude-3-5-sonnet-20241022",
    "claude-3-5-sonnet-20240620",
    "claude-sonnet-4-5-20250929",
    "claude-haiku-4-5-20251001",
    "claude-3-opus",
    "claude-3-sonnet",
    "claude-3-5-sonnet",
    "claude-3-haiku",
];

#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    default_model: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, default_model: Option<String>) -> Result<Self, AiError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AiError::Authentication {
                provider: "anthropic".into(),
                message: "API key is empty or invalid".into(),
            });
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| AiError::Unknown {
                provider: "anthropic".into(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            api_key,
            default_model: default_model
                .unwrap_or_else(|| "claude-sonnet-4-5-20250929".to_string()),
            client,
        })
    }

    fn validate_model(&self, model: &str) -> Result<(), AiError> {
        if !self.supports_model(model) {
            return Err(AiError::InvalidRequest {
                provider: "anthropic".into(),
                message: format!(
                    "Model '{}' not available. Available models: {}",
                    model,
                    AVAILABLE_MODELS.join(", ")
                ),
            });
        }
        Ok(())
    }

    fn map_error_status(status: reqwest::StatusCode, body: &str, retry_after: Option<u64>) -> AiError {
        let message = body.chars().take(300).collect::<String>();
        match status.as_u16() {
            429 => AiError::RateLimit {
                provider: "anthropic".into(),
                message,
                retry_after,
            },
            401 | 403 => AiError::Authentication {
                provider: "anthropic".into(),
                message,
            },
            400 | 404 | 422 => AiError::InvalidRequest {
                provider: "anthropic".into(),
                message,
            },
            // Anthropic signals overload with 529 alongside ordinary 5xx.
            s if s >= 500 => AiError::ServiceUnavailable {
                provider: "anthropic".into(),
                message,
            },
            _ => AiError::Unknown {
                provider: "anthropic".into(),
                message,
            },
        }
    }

    fn map_stop_reason(raw: Option<&str>) -> Option<FinishReason> {
        raw.map(|r| match r {
            "end_turn" | "stop_sequence" => FinishReason::Stop,
            "max_tokens" => FinishReason::MaxTokens,
            _ => FinishReason::Other,
        })
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
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
        config.validate("anthropic")?;
        let model = model.unwrap_or(&self.default_model);
        self.validate_model(model)?;

        let mut request = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
        });
        if let Some(system) = system_prompt {
            request["system"] = json!(system);
        }
        if !config.stop_sequences.is_empty() {
            request["stop_sequences"] = json!(config.stop_sequences);
        }

        tracing::debug!(model, max_tokens = config.max_tokens, "anthropic request");

        let response = self
            .client
            .post(ANTHROPIC_ENDPOINT)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout {
                        provider: "anthropic".into(),
                        message: e.to_string(),
                    }
                } else {
                    AiError::ServiceUnavailable {
                        provider: "anthropic".into(),
                        message: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_error_status(status, &body, retry_after));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| AiError::Unknown {
            provider: "anthropic".into(),
            message: format!("failed to decode response: {e}"),
        })?;

        let content = parsed
            .content
            .first()
            .map(|b| b.text.clone())
            .unwrap_or_default();
        let prompt_tokens = parsed.usage.input_tokens;
        let completion_tokens = parsed.usage.output_tokens;

        Ok(AiResponse {
            content,
            model: parsed.model.clone(),
            provider: "anthropic".into(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            estimated_cost: self.estimate_cost(prompt_tokens, completion_tokens, Some(model)),
            finish_reason: Self::map_stop_reason(parsed.stop_reason.as_deref()),
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
                tracing::warn!(model, "no pricing for model, defaulting to sonnet rates");
                (3.0, 15.0)
            });
        let cost = (prompt_tokens as f64 / 1_000_000.0) * input_rate
            + (completion_tokens as f64 / 1_000_000.0) * output_rate;
        (cost * 1e6).round() / 1e6
    }

    fn context_window(&self, _model: Option<&str>) -> u32 {
        // All supported Claude models carry a 200K window.
        200_000
    }

    fn pricing_table(&self) -> &[(&'static str, f64, f64)] {
        MODEL_PRICING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_auth_error() {
        assert!(matches!(
            AnthropicProvider::new("", None).unwrap_err(),
            AiError::Authentication { .. }
        ));
    }

    #[test]
    fn dated_model_beats_generic_prefix() {
        let provider = AnthropicProvider::new("sk-ant-test", None).unwrap();
        // claude-3-5-sonnet-20241022 should match its own row, not claude-3-5-sonnet.
        let cost = provider.estimate_cost(0, 1_000_000, Some("claude-3-5-sonnet-20241022"));
        assert_eq!(cost, 15.0);
        let haiku45 = provider.estimate_cost(0, 1_000_000, Some("claude-haiku-4-5-20251001"));
        assert_eq!(haiku45, 3.0);
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(
            AnthropicProvider::map_stop_reason(Some("end_turn")),
            Some(FinishReason::Stop)
        );
        assert_eq!(
            AnthropicProvider::map_stop_reason(Some("max_tokens")),
            Some(FinishReason::MaxTokens)
        );
        assert_eq!(
            AnthropicProvider::map_stop_reason(Some("stop_sequence")),
            Some(FinishReason::Stop)
        );
    }

    #[test]
    fn approximate_token_count() {
        let provider = AnthropicProvider::new("sk-ant-test", None).unwrap();
        assert_eq!(provider.count_tokens("abcdefgh", None), 2);
    }
}
