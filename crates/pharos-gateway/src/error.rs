//! Error taxonomy for the gateway core
//!
//! Validation and execution failures are folded into turn results by the
//! orchestrator; provider failures abort the turn, with circuit-open
//! rejections carrying a retry hint for the transport layer.

use std::time::Duration;
use thiserror::Error;

use crate::safety::ValidationOutcome;

/// Result type alias using pharos-gateway Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the gateway core
#[derive(Error, Debug)]
pub enum Error {
    /// Script rejected by the safety gate before execution
    #[error("script validation failed: {}", .0.errors.join("; "))]
    Validation(ValidationOutcome),

    /// Script passed validation but failed at runtime
    #[error("script execution failed: {0}")]
    Execution(String),

    /// The model backend errored or timed out
    #[error("provider error: {0}")]
    Provider(#[from] pharos_ai::Error),

    /// The circuit is open; retry after the given delay
    #[error("circuit open, retry in {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// No conversation registered under this id
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure in the executor runtime
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Suggested retry delay, present only for circuit-open rejections
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::CircuitOpen { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether this error aborts the turn (provider-class failures do;
    /// validation and execution failures are recorded instead)
    pub fn aborts_turn(&self) -> bool {
        matches!(self, Error::Provider(_) | Error::CircuitOpen { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::SafetyLevel;

    #[test]
    fn test_retry_after_only_for_circuit_open() {
        let open = Error::CircuitOpen {
            retry_after: Duration::from_secs(12),
        };
        assert_eq!(open.retry_after(), Some(Duration::from_secs(12)));
        assert_eq!(Error::Execution("boom".into()).retry_after(), None);
    }

    #[test]
    fn test_validation_display_includes_reasons() {
        let outcome = ValidationOutcome {
            valid: false,
            errors: vec!["script is empty".into()],
            warnings: vec![],
            safety_level: SafetyLevel::Caution,
            detected_commands: vec![],
        };
        let msg = Error::Validation(outcome).to_string();
        assert!(msg.contains("script is empty"), "got: {}", msg);
    }

    #[test]
    fn test_aborts_turn_classification() {
        assert!(
            Error::Provider(pharos_ai::Error::InvalidApiKey).aborts_turn()
        );
        assert!(
            Error::CircuitOpen {
                retry_after: Duration::ZERO
            }
            .aborts_turn()
        );
        assert!(!Error::Execution("x".into()).aborts_turn());
    }
}
