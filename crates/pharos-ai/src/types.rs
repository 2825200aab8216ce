//! Core types for chat interactions

use serde::{Deserialize, Serialize};

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Get the wire name for this role
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// A chat completion request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// System prompt, sent ahead of the conversation messages
    pub system_prompt: Option<String>,
    /// Conversation messages in order
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// Create a request with a system prompt
    pub fn with_system(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            ..Default::default()
        }
    }

    /// Add a message to the request
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }
}

/// Token usage reported by a provider for one completion
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

impl TokenUsage {
    /// Build usage from prompt/completion counts
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
        }
    }

    /// Estimate the dollar cost of this usage for a model
    pub fn estimate_cost(&self, spec: &ModelSpec) -> f64 {
        let input = (self.prompt as f64 / 1_000_000.0) * spec.cost.input;
        let output = (self.completion as f64 / 1_000_000.0) * spec.cost.output;
        input + output
    }
}

/// A chat completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Response text
    pub text: String,
    /// Reasoning trace, when the model emits one
    pub reasoning: Option<String>,
    /// Model that produced the response
    pub model: String,
    /// Token usage for this completion
    pub usage: TokenUsage,
}

/// Cost information for a model (dollars per million tokens)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CostInfo {
    pub input: f64,
    pub output: f64,
}

/// Supported input types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Text,
    Image,
}

/// Static description of a callable model. Immutable after the owning
/// provider initializes; used for routing and cost estimation only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model identifier (e.g., "gpt-4o-mini")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Whether the model supports extended reasoning
    #[serde(default)]
    pub reasoning: bool,
    /// Context window size in tokens
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Supported input types
    #[serde(default = "default_input_types")]
    pub input_types: Vec<InputType>,
    /// Cost per million tokens
    #[serde(default)]
    pub cost: CostInfo,
}

fn default_context_window() -> u32 {
    128_000
}

fn default_max_tokens() -> u32 {
    4_096
}

fn default_input_types() -> Vec<InputType> {
    vec![InputType::Text]
}

impl ModelSpec {
    /// Create a text-only spec with the given id and sensible defaults
    pub fn text(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            reasoning: false,
            context_window: 128_000,
            max_tokens: 4_096,
            input_types: vec![InputType::Text],
            cost: CostInfo::default(),
        }
    }
}
