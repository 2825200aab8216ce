//! Error types for pharos-ai

use std::time::Duration;
use thiserror::Error;

/// Result type alias using pharos-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to model backends
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend returned an error response
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid or missing API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Call exceeded its deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// No provider registered under this name
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Provider does not serve this model
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// On-device model failed to load within the bound
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl Error {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout(_) => true,
            Error::Api { status, message } => {
                let msg = message.to_lowercase();
                matches!(status, 429 | 500 | 502 | 503 | 529)
                    || msg.contains("rate limit")
                    || msg.contains("overloaded")
                    || msg.contains("too many requests")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_timeout() {
        assert!(Error::Timeout(Duration::from_secs(60)).is_retryable());
    }

    #[test]
    fn test_retryable_api_status() {
        assert!(Error::api(429, "slow down").is_retryable());
        assert!(Error::api(503, "unavailable").is_retryable());
    }

    #[test]
    fn test_retryable_api_message() {
        assert!(Error::api(400, "Rate limit exceeded, please retry").is_retryable());
        assert!(Error::api(400, "The server is overloaded").is_retryable());
    }

    #[test]
    fn test_not_retryable() {
        assert!(!Error::InvalidApiKey.is_retryable());
        assert!(!Error::UnknownProvider("nope".into()).is_retryable());
        assert!(!Error::api(401, "invalid key").is_retryable());
    }
}
