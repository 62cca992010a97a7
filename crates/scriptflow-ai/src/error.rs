use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("API key is not configured")]
    MissingApiKey,

    #[error("Request timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Upstream rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Upstream API error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Conversion failed [{code}]: {message}")]
    Conversion { code: String, message: String },

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl AiError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            AiError::Timeout(timeout)
        } else if let Some(status) = err.status() {
            AiError::Upstream {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            AiError::Network(err.to_string())
        }
    }

    /// Upstream throttling and 5xx responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::RateLimited { .. } => true,
            AiError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// True when the remote service could not be reached or answered with a 5xx.
    pub fn is_unavailable(&self) -> bool {
        match self {
            AiError::Network(_) | AiError::Timeout(_) => true,
            AiError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type LlmResult<T> = std::result::Result<T, AiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy() {
        assert!(AiError::RateLimited { retry_after: None }.is_retryable());
        assert!(AiError::Upstream {
            status: 503,
            message: "down".into()
        }
        .is_retryable());
        assert!(!AiError::Upstream {
            status: 401,
            message: "bad key".into()
        }
        .is_retryable());
        assert!(!AiError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(AiError::Timeout(Duration::from_secs(30)).is_unavailable());
    }

    #[test]
    fn timeout_message_uses_millis() {
        assert_eq!(
            AiError::Timeout(Duration::from_secs(30)).to_string(),
            "Request timeout after 30000ms"
        );
    }
}
