//! Cloud chat backend (OpenAI-compatible chat completions API)

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    providers::ChatProvider,
    types::{ChatRequest, ChatResponse, ModelSpec, TokenUsage},
};
use async_trait::async_trait;

/// Client for a cloud-hosted, OpenAI-compatible backend
pub struct CloudProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    models: Vec<ModelSpec>,
}

impl CloudProvider {
    /// Create a new cloud provider
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        models: Vec<ModelSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            models,
        }
    }

    fn build_request(&self, model: &str, request: &ChatRequest) -> WireRequest {
        let mut messages = Vec::new();

        // System prompt goes first
        if let Some(ref system_prompt) = request.system_prompt {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: system_prompt.clone(),
            });
        }

        for msg in &request.messages {
            messages.push(WireMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
            });
        }

        WireRequest {
            model: model.to_string(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        }
    }
}

#[async_trait]
impl ChatProvider for CloudProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    async fn chat(&self, model: &str, request: &ChatRequest) -> Result<ChatResponse> {
        if !self.models.iter().any(|m| m.id == model) {
            return Err(Error::UnknownModel(model.to_string()));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request(model, request);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), text));
        }

        let wire: WireResponse = response.json().await?;
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::UnexpectedResponse("response had no choices".to_string()))?;

        let usage = wire
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(ChatResponse {
            text: choice.message.content.unwrap_or_default(),
            reasoning: choice.message.reasoning_content,
            model: wire.model,
            usage,
        })
    }

    async fn health(&self) -> Result<()> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), text));
        }
        Ok(())
    }
}

// --- Wire types ---

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct WireResponse {
    model: String,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    fn provider() -> CloudProvider {
        CloudProvider::new(
            "cloud",
            "https://api.example.com/v1",
            "sk-test",
            vec![ModelSpec::text("test-model")],
        )
    }

    #[test]
    fn test_build_request_system_first() {
        let mut req = ChatRequest::with_system("be brief");
        req.push(ChatMessage::user("hi"));
        req.push(ChatMessage::assistant("hello"));

        let wire = provider().build_request("test-model", &req);
        assert_eq!(wire.model, "test-model");
        assert_eq!(wire.messages.len(), 3);
        assert_eq!(wire.messages[0].role, "system");
        assert_eq!(wire.messages[1].role, "user");
        assert_eq!(wire.messages[2].role, "assistant");
        assert!(!wire.stream);
    }

    #[test]
    fn test_build_request_no_system() {
        let mut req = ChatRequest::default();
        req.push(ChatMessage::user("hi"));
        let wire = provider().build_request("test-model", &req);
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.messages[0].role, "user");
    }

    #[tokio::test]
    async fn test_unknown_model_rejected_without_request() {
        // Unregistered model id fails before any network I/O.
        let err = provider()
            .chat("not-a-model", &ChatRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownModel(m) if m == "not-a-model"));
    }
}
