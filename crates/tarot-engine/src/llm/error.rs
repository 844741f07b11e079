//! Closed error taxonomy for provider calls. Retryability is a property of
//! the variant, so the orchestrator never matches on message strings.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("[{provider}] rate limited: {message}")]
    RateLimit {
        provider: String,
        message: String,
        /// Vendor-supplied wait hint; overrides exponential backoff.
        retry_after: Option<u64>,
    },

    #[error("[{provider}] timed out: {message}")]
    Timeout { provider: String, message: String },

    #[error("[{provider}] service unavailable: {message}")]
    ServiceUnavailable { provider: String, message: String },

    #[error("[{provider}] authentication failed: {message}")]
    Authentication { provider: String, message: String },

    #[error("[{provider}] invalid request: {message}")]
    InvalidRequest { provider: String, message: String },

    #[error("no compatible provider for model '{model}' (providers: {available})")]
    NoCompatibleProvider { model: String, available: String },

    #[error("all {count} compatible providers failed. {summary}")]
    AllProvidersFailed { count: usize, summary: String },

    #[error("[{provider}] {message}")]
    Unknown { provider: String, message: String },
}

impl AiError {
    /// Transient failures that the orchestrator retries with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. } | Self::Timeout { .. } | Self::ServiceUnavailable { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit {
                retry_after: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::RateLimit { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::ServiceUnavailable { provider, .. }
            | Self::Authentication { provider, .. }
            | Self::InvalidRequest { provider, .. }
            | Self::Unknown { provider, .. } => provider,
            Self::NoCompatibleProvider { .. } | Self::AllProvidersFailed { .. } => "orchestrator",
        }
    }

    /// Stable identifier for logs, error summaries, and HTTP mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimit { .. } => "RateLimit",
            Self::Timeout { .. } => "Timeout",
            Self::ServiceUnavailable { .. } => "ServiceUnavailable",
            Self::Authentication { .. } => "Authentication",
            Self::InvalidRequest { .. } => "InvalidRequest",
            Self::NoCompatibleProvider { .. } => "NO_COMPATIBLE_PROVIDER",
            Self::AllProvidersFailed { .. } => "ALL_PROVIDERS_FAILED",
            Self::Unknown { .. } => "Unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_per_variant() {
        let rate = AiError::RateLimit {
            provider: "openai".into(),
            message: "429".into(),
            retry_after: None,
        };
        let auth = AiError::Authentication {
            provider: "openai".into(),
            message: "bad key".into(),
        };
        assert!(rate.is_retryable());
        assert!(!auth.is_retryable());
    }

    #[test]
    fn retry_after_only_from_rate_limit() {
        let e = AiError::RateLimit {
            provider: "p".into(),
            message: "m".into(),
            retry_after: Some(7),
        };
        assert_eq!(e.retry_after(), Some(Duration::from_secs(7)));
        let t = AiError::Timeout {
            provider: "p".into(),
            message: "m".into(),
        };
        assert_eq!(t.retry_after(), None);
    }
}
