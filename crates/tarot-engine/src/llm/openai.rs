//! OpenAI provider adapter (chat completions API).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{longest_prefix_match, AiError, AiProvider, AiResponse, FinishReason, GenerationConfig};

const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Per-1M-token (input, output) pricing, longest-match indexed.
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("gpt-4", 30.0, 60.0),
    ("gpt-4-turbo", 10.0, 30.0),
    ("gpt-4-turbo-preview", 10.0, 30.0),
    ("gpt-4-0125-preview", 10.0, 30.0),
    ("gpt-4-1106-preview", 10.0, 30.0),
    ("gpt-4o-mini", 0.15, 0.6),
    ("gpt-3.5-turbo", 0.5, 1.5),
    ("gpt-3.5-turbo-0125", 0.5, 1.5),
    ("gpt-3.5-turbo-1106", 1.0, 2.0),
];

const CONTEXT_WINDOWS: &[(&str, u32)] = &[
    ("gpt-4", 8_192),
    ("gpt-4-turbo", 128_000),
    ("gpt-4-turbo-preview", 128_000),
    ("gpt-4-0125-preview", 128_000),
    ("gpt-4-1106-preview", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-3.5-turbo", 4_096),
    ("gpt-3.5-turbo-0125", 16_385),
    ("gpt-3.5-turbo-1106", 16_385),
];

const AVAILABLE_MODELS: &[&str] = &[
    "gpt-4",
    "gpt-4-turbo",
    "gpt-4-turbo-preview",
    "gpt-4-0125-preview",
    "gpt-4-1106-preview",
    "gpt-4o-mini",
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-0125",
    "gpt-3.5-turbo-1106",
];

pub struct OpenAiProvider {
    api_key: String,
    default_model: String,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, default_model: Option<String>) -> Result<Self, AiError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AiError::Authentication {
                provider: "openai".into(),
                message: "API key is empty or invalid".into(),
            });
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| AiError::Unknown {
                provider: "openai".into(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            api_key,
            default_model: default_model.unwrap_or_else(|| "gpt-4-turbo-preview".to_string()),
            client,
        })
    }

    fn validate_model(&self, model: &str) -> Result<(), AiError> {
        if !self.supports_model(model) {
            return Err(AiError::InvalidRequest {
                provider: "openai".into(),
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
                provider: "openai".into(),
                message,
                retry_after,
            },
            401 | 403 => AiError::Authentication {
                provider: "openai".into(),
                message,
            },
            400 | 404 | 422 => AiError::InvalidRequest {
                provider: "openai".into(),
                message,
            },
            s if s >= 500 => AiError::ServiceUnavailable {
                provider: "openai".into(),
                message,
            },
            _ => AiError::Unknown {
                provider: "openai".into(),
                message,
            },
        }
    }

    fn map_finish_reason(raw: Option<&str>) -> Option<FinishReason> {
        raw.map(|r| match r {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::MaxTokens,
            "content_filter" => FinishReason::Safety,
            _ => FinishReason::Other,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
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
        config.validate("openai")?;
        let model = model.unwrap_or(&self.default_model);
        self.validate_model(model)?;

        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let mut request = json!({
            "model": model,
            "messages": messages,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "frequency_penalty": config.frequency_penalty,
            "presence_penalty": config.presence_penalty,
        });
        if !config.stop_sequences.is_empty() {
            request["stop"] = json!(config.stop_sequences);
        }

        tracing::debug!(model, max_tokens = config.max_tokens, "openai request");

        let response = self
            .client
            .post(OPENAI_ENDPOINT)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout {
                        provider: "openai".into(),
                        message: e.to_string(),
                    }
                } else {
                    AiError::ServiceUnavailable {
                        provider: "openai".into(),
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

        let parsed: ChatResponse = response.json().await.map_err(|e| AiError::Unknown {
            provider: "openai".into(),
            message: format!("failed to decode response: {e}"),
        })?;

        let choice = parsed.choices.first().ok_or_else(|| AiError::Unknown {
            provider: "openai".into(),
            message: "empty choices array".into(),
        })?;

        let (prompt_tokens, completion_tokens, total_tokens) = parsed
            .usage
            .as_ref()
            .map(|u| (u.prompt_tokens, u.completion_tokens, u.total_tokens))
            .unwrap_or((0, 0, 0));

        Ok(AiResponse {
            content: choice.message.content.clone().unwrap_or_default(),
            model: parsed.model.clone(),
            provider: "openai".into(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
            estimated_cost: self.estimate_cost(prompt_tokens, completion_tokens, Some(model)),
            finish_reason: Self::map_finish_reason(choice.finish_reason.as_deref()),
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
                tracing::warn!(model, "no pricing for model, defaulting to gpt-4 rates");
                (30.0, 60.0)
            });
        let cost = (prompt_tokens as f64 / 1_000_000.0) * input_rate
            + (completion_tokens as f64 / 1_000_000.0) * output_rate;
        (cost * 1e6).round() / 1e6
    }

    fn context_window(&self, model: Option<&str>) -> u32 {
        let model = model.unwrap_or(&self.default_model);
        longest_prefix_match(model, CONTEXT_WINDOWS)
            .copied()
            .unwrap_or(8_192)
    }

    fn pricing_table(&self) -> &[(&'static str, f64, f64)] {
        MODEL_PRICING
    }
}
