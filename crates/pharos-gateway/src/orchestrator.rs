//! Turn orchestrator: drives one conversational turn end to end
//!
//! Per turn: append the user message, obtain a completion through the
//! provider registry behind that provider's circuit breaker, gate-check and
//! execute any embedded script blocks, and assemble a [`TurnResult`]. One
//! bad script never aborts a turn; provider failures do, distinguishably.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use pharos_ai::{ChatMessage, ChatRequest, ChatResponse, ModelPath, ProviderRegistry, Role, TokenUsage};

use crate::breaker::{BreakerConfig, BreakerError, BreakerStats, CircuitBreaker};
use crate::conversation::{ConversationMessage, ConversationStore};
use crate::error::{Error, Result};
use crate::executor::{ExecutionRequest, ExecutionResult, SessionExecutor};
use crate::safety::ScriptSafetyGate;
use crate::telemetry::TelemetrySink;

/// Fenced script blocks embedded in a model response
static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^```[^\n]*\n(.*?)^```[ \t]*$").expect("script block pattern must compile")
});

/// One script block paired with its execution record
#[derive(Debug, Clone, Serialize)]
pub struct ScriptExecution {
    pub script: String,
    pub result: ExecutionResult,
}

/// Aggregate outcome of one turn, handed to the transport layer unchanged
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub conversation_id: String,
    /// The assistant's textual response
    pub response: String,
    /// Reasoning trace, when the model emitted one
    pub reasoning: Option<String>,
    /// One record per script block, in document order
    pub executions: Vec<ScriptExecution>,
    /// Token usage from the provider call, unmodified
    pub usage: TokenUsage,
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// System prompt prepended to every provider request
    pub system_prompt: String,
    /// Most recent messages included as context
    pub history_limit: usize,
    /// Optional `"provider/model"` override; defaults to the registry primary
    pub model: Option<String>,
    /// Breaker settings applied per provider
    pub breaker: BreakerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant. Emit shell scripts in fenced code \
                            blocks when you want them executed."
                .to_string(),
            history_limit: 40,
            model: None,
            breaker: BreakerConfig::default(),
        }
    }
}

/// Drives turns against the registry, gate, and executor
pub struct TurnOrchestrator {
    registry: Arc<ProviderRegistry>,
    executor: Arc<SessionExecutor>,
    gate: ScriptSafetyGate,
    store: Arc<dyn ConversationStore>,
    telemetry: Arc<dyn TelemetrySink>,
    config: OrchestratorConfig,
    /// One long-lived breaker per provider, reused across turns
    breakers: parking_lot::Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    /// Per-conversation turn serialization; waiters queue FIFO
    turn_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TurnOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        executor: Arc<SessionExecutor>,
        store: Arc<dyn ConversationStore>,
        telemetry: Arc<dyn TelemetrySink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            gate: ScriptSafetyGate::default(),
            store,
            telemetry,
            config,
            breakers: parking_lot::Mutex::new(HashMap::new()),
            turn_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Process one turn: user message in, [`TurnResult`] out.
    ///
    /// With `conversation_id` absent a new conversation is started.
    /// Validation and execution failures of individual scripts are recorded
    /// in the result; provider failures (including circuit-open) propagate.
    pub async fn process_turn(
        &self,
        conversation_id: Option<&str>,
        message: &str,
        metadata: HashMap<String, String>,
    ) -> Result<TurnResult> {
        let conversation = match conversation_id {
            Some(id) => self.store.get(id).await?,
            None => self.store.create(metadata).await?,
        };
        let conv_id = conversation.id;

        // A second message for a conversation already mid-turn queues here.
        let turn_lock = self.turn_lock(&conv_id);
        let _turn = turn_lock.lock().await;

        self.store
            .add_message(&conv_id, ConversationMessage::new(Role::User, message))
            .await?;

        let request = self.build_request(&conv_id).await?;
        let provider_name = self.target_provider()?;
        let response = self.call_provider(&provider_name, &request).await?;

        let mut executions = Vec::new();
        for script in extract_script_blocks(&response.text) {
            let result = self.run_block(&conv_id, &script).await;
            self.telemetry
                .script_executed(&conv_id, result.success, result.duration_ms);
            executions.push(ScriptExecution { script, result });
        }

        // The assistant's text lands in history no matter how scripts fared.
        self.store
            .add_message(
                &conv_id,
                ConversationMessage::new(Role::Assistant, &response.text),
            )
            .await?;
        self.store
            .record_usage(&conv_id, response.usage.total)
            .await?;

        tracing::info!(
            conversation = %conv_id,
            scripts = executions.len(),
            tokens = response.usage.total,
            "turn completed"
        );

        Ok(TurnResult {
            conversation_id: conv_id,
            response: response.text,
            reasoning: response.reasoning,
            executions,
            usage: response.usage,
        })
    }

    /// Run a raw script out of band, through the same gate and executor
    pub async fn run_script(
        &self,
        script: &str,
        session_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        let request = ExecutionRequest {
            script: script.to_string(),
            session_id: session_id.map(str::to_string),
            timeout,
        };
        self.executor.execute(&request).await
    }

    /// End a conversation: drop its history and tear down its session
    pub async fn end_conversation(&self, id: &str) -> Result<()> {
        self.store.delete(id).await?;
        self.executor.terminate_session(id).await;
        self.turn_locks.lock().remove(id);
        Ok(())
    }

    /// Snapshot of every provider breaker
    pub fn breaker_stats(&self) -> HashMap<String, BreakerStats> {
        self.breakers
            .lock()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.stats()))
            .collect()
    }

    /// Force a provider's breaker closed; returns false if none exists yet
    pub fn reset_breaker(&self, provider: &str) -> bool {
        match self.breakers.lock().get(provider) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Per-provider health map
    pub async fn provider_health(&self) -> HashMap<String, bool> {
        self.registry.health_check().await
    }

    /// Registered provider names
    pub fn providers(&self) -> Vec<String> {
        self.registry.list_providers()
    }

    // ---- internals ----

    async fn build_request(&self, conv_id: &str) -> Result<ChatRequest> {
        let history = self
            .store
            .messages_for_context(conv_id, self.config.history_limit)
            .await?;
        let mut request = ChatRequest::with_system(&self.config.system_prompt);
        for msg in &history {
            request.push(ChatMessage {
                role: msg.role,
                content: msg.content.clone(),
            });
        }
        Ok(request)
    }

    /// Provider the configured route targets
    fn target_provider(&self) -> Result<String> {
        match &self.config.model {
            Some(path) => Ok(ModelPath::parse(path)
                .map_err(Error::Provider)?
                .provider),
            None => Ok(self.registry.primary().provider.clone()),
        }
    }

    async fn call_provider(&self, provider: &str, request: &ChatRequest) -> Result<ChatResponse> {
        let breaker = self.breaker_for(provider);
        let call = async {
            match &self.config.model {
                Some(path) => self.registry.chat_with_model(path, request).await,
                None => self.registry.chat(request).await,
            }
        };

        match breaker.execute(call).await {
            Ok(response) => {
                self.telemetry
                    .chat_completed(provider, true, Some(&response.usage));
                Ok(response)
            }
            Err(BreakerError::Open { retry_after }) => {
                self.telemetry.chat_completed(provider, false, None);
                Err(Error::CircuitOpen { retry_after })
            }
            Err(BreakerError::Timeout(timeout)) => {
                self.telemetry.chat_completed(provider, false, None);
                Err(Error::Provider(pharos_ai::Error::Timeout(timeout)))
            }
            Err(BreakerError::Inner(e)) => {
                self.telemetry.chat_completed(provider, false, None);
                Err(Error::Provider(e))
            }
        }
    }

    /// Gate-check and execute one script block; failures become records
    async fn run_block(&self, conv_id: &str, script: &str) -> ExecutionResult {
        let validation = self.gate.validate(script);
        if !validation.valid {
            return ExecutionResult {
                success: false,
                output: validation.errors.join("; "),
                duration_ms: 0,
                session_id: conv_id.to_string(),
                validation,
            };
        }

        match self
            .executor
            .execute(&ExecutionRequest::in_session(script, conv_id))
            .await
        {
            Ok(result) => result,
            // The executor revalidates; treat its rejection like our own.
            Err(Error::Validation(outcome)) => ExecutionResult {
                success: false,
                output: outcome.errors.join("; "),
                duration_ms: 0,
                session_id: conv_id.to_string(),
                validation: outcome,
            },
            Err(e) => ExecutionResult {
                success: false,
                output: e.to_string(),
                duration_ms: 0,
                session_id: conv_id.to_string(),
                validation,
            },
        }
    }

    fn breaker_for(&self, provider: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.breaker.clone())))
            .clone()
    }

    fn turn_lock(&self, conv_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.turn_locks
            .lock()
            .entry(conv_id.to_string())
            .or_default()
            .clone()
    }
}

/// Extract fenced script blocks in document order
fn extract_script_blocks(text: &str) -> Vec<String> {
    SCRIPT_BLOCK
        .captures_iter(text)
        .map(|c| c[1].trim_end().to_string())
        .collect()
}
