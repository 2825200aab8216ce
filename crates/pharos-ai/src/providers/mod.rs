//! Chat backend implementations

pub mod cloud;
pub mod local;

use crate::{ChatRequest, ChatResponse, Error, ModelSpec, Result};
use async_trait::async_trait;

/// Trait for chat backends
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Registered name of this provider (e.g. "cloud", "local")
    fn name(&self) -> &str;

    /// Models this provider serves
    fn models(&self) -> &[ModelSpec];

    /// Produce a completion for the given model
    async fn chat(&self, model: &str, request: &ChatRequest) -> Result<ChatResponse>;

    /// Check whether the backend is reachable
    async fn health(&self) -> Result<()>;
}

/// Get an API key from environment or provided value
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_api_key_provided_wins() {
        let key = get_api_key(Some("sk-test"), "PHAROS_TEST_MISSING_VAR").unwrap();
        assert_eq!(key, "sk-test");
    }

    #[test]
    fn test_get_api_key_missing() {
        let err = get_api_key(None, "PHAROS_TEST_MISSING_VAR").unwrap_err();
        assert!(matches!(err, Error::InvalidApiKey));
    }
}
