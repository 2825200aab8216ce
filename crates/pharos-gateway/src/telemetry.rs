//! Audit/telemetry sink
//!
//! The core reports per-call outcomes and token counts here; storage and
//! transport of the records belong to the collaborator implementing the
//! trait.

use pharos_ai::TokenUsage;

/// Receives per-call success/failure and accounting signals
pub trait TelemetrySink: Send + Sync {
    /// A provider chat call finished
    fn chat_completed(&self, provider: &str, ok: bool, usage: Option<&TokenUsage>);

    /// A script execution finished
    fn script_executed(&self, session_id: &str, ok: bool, duration_ms: u64);
}

/// Default sink: structured log events via tracing
#[derive(Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn chat_completed(&self, provider: &str, ok: bool, usage: Option<&TokenUsage>) {
        let total = usage.map(|u| u.total).unwrap_or(0);
        tracing::info!(provider, ok, tokens = total, "chat completed");
    }

    fn script_executed(&self, session_id: &str, ok: bool, duration_ms: u64) {
        tracing::info!(session = session_id, ok, duration_ms, "script executed");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Records every signal for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        pub chats: Mutex<Vec<(String, bool)>>,
        pub scripts: Mutex<Vec<(String, bool)>>,
    }

    impl TelemetrySink for RecordingSink {
        fn chat_completed(&self, provider: &str, ok: bool, _usage: Option<&TokenUsage>) {
            self.chats.lock().push((provider.to_string(), ok));
        }

        fn script_executed(&self, session_id: &str, ok: bool, _duration_ms: u64) {
            self.scripts.lock().push((session_id.to_string(), ok));
        }
    }
}
