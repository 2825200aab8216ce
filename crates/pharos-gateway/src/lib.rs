//! pharos-gateway: execution core of the pharos conversational agent gateway
//!
//! Turns a validated model response into safely executed side effects and a
//! reliable [`TurnResult`], even when backends or local processes fail. The
//! pieces: a circuit breaker guarding model calls, a script safety gate, a
//! sandboxed session executor, and a turn orchestrator threading them together.

pub mod breaker;
pub mod conversation;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod safety;
pub mod telemetry;

pub use breaker::{BreakerConfig, BreakerError, BreakerState, BreakerStats, CircuitBreaker};
pub use conversation::{Conversation, ConversationMessage, ConversationStore, InMemoryStore};
pub use error::{Error, Result};
pub use executor::{
    ExecutionRequest, ExecutionResult, ExecutorConfig, RunError, RunOutput, ScriptBackend,
    ScriptSession, SessionExecutor, ShellBackend,
};
pub use orchestrator::{OrchestratorConfig, ScriptExecution, TurnOrchestrator, TurnResult};
pub use safety::{PatternSet, SafetyLevel, ScriptSafetyGate, ValidationOutcome};
pub use telemetry::{TelemetrySink, TracingSink};
