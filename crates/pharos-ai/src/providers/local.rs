//! On-device chat backend (Ollama-style local inference server)
//!
//! Local inference hardware serves one request at a time, so all chat calls
//! are serialized through a single FIFO mutex, across every conversation.
//! Model loading goes through the loader CLI as a detached process plus a
//! polling loop against the model-listing endpoint, never an SDK call.

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::{
    error::{Error, Result},
    providers::ChatProvider,
    types::{ChatRequest, ChatResponse, ModelSpec, TokenUsage},
};
use async_trait::async_trait;

/// How long to wait for a model to finish loading
const LOAD_TIMEOUT: Duration = Duration::from_secs(120);
/// Delay between polls of the model-listing endpoint
const LOAD_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Client for a local inference server
pub struct LocalProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    /// Command used to load a model (e.g. "ollama")
    loader_bin: String,
    models: Vec<ModelSpec>,
    /// Single in-flight inference; tokio's mutex queues waiters FIFO
    inference_lock: Mutex<()>,
}

impl LocalProvider {
    /// Create a new local provider
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        loader_bin: impl Into<String>,
        models: Vec<ModelSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            loader_bin: loader_bin.into(),
            models,
            inference_lock: Mutex::new(()),
        }
    }

    /// List model names currently available on the server
    async fn list_loaded(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), text));
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Make sure the named model is available, loading it if necessary.
    ///
    /// If absent, spawns the loader CLI detached and polls the listing
    /// endpoint until the model appears or the load bound expires.
    async fn ensure_loaded(&self, model: &str) -> Result<()> {
        if model_present(&self.list_loaded().await?, model) {
            return Ok(());
        }

        tracing::info!(model, "model not loaded, invoking loader");
        let mut child = Command::new(&self.loader_bin)
            .arg("pull")
            .arg(model)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::ModelLoad(format!("failed to spawn loader: {}", e)))?;

        let deadline = tokio::time::Instant::now() + LOAD_TIMEOUT;
        loop {
            if tokio::time::Instant::now() >= deadline {
                let _ = child.kill().await;
                return Err(Error::ModelLoad(format!(
                    "model '{}' did not load within {:?}",
                    model, LOAD_TIMEOUT
                )));
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;

            match self.list_loaded().await {
                Ok(loaded) if model_present(&loaded, model) => return Ok(()),
                Ok(_) => {}
                Err(e) => tracing::debug!(model, error = %e, "listing poll failed"),
            }
        }
    }
}

/// Match a model name against the server's listing, tolerating the
/// server-side ":latest" tag suffix.
fn model_present(loaded: &[String], model: &str) -> bool {
    loaded
        .iter()
        .any(|m| m == model || m.strip_suffix(":latest") == Some(model))
}

#[async_trait]
impl ChatProvider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    async fn chat(&self, model: &str, request: &ChatRequest) -> Result<ChatResponse> {
        // Take the inference permit before touching the server so that
        // load + generate run as one unit, in arrival order.
        let _permit = self.inference_lock.lock().await;

        self.ensure_loaded(model).await?;

        let mut messages = Vec::new();
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

        let url = format!("{}/api/chat", self.base_url);
        let body = WireRequest {
            model: model.to_string(),
            messages,
            stream: false,
        };

        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), text));
        }

        let wire: WireResponse = response.json().await?;
        let usage = TokenUsage::new(
            wire.prompt_eval_count.unwrap_or(0),
            wire.eval_count.unwrap_or(0),
        );

        Ok(ChatResponse {
            text: wire.message.content,
            reasoning: wire.message.thinking,
            model: wire.model,
            usage,
        })
    }

    async fn health(&self) -> Result<()> {
        self.list_loaded().await.map(|_| ())
    }
}

// --- Wire types ---

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
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
    message: WireResponseMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: String,
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_present_exact() {
        let loaded = vec!["llama3.2".to_string(), "phi4".to_string()];
        assert!(model_present(&loaded, "phi4"));
        assert!(!model_present(&loaded, "mistral"));
    }

    #[test]
    fn test_model_present_latest_tag() {
        let loaded = vec!["llama3.2:latest".to_string()];
        assert!(model_present(&loaded, "llama3.2"));
        assert!(model_present(&loaded, "llama3.2:latest"));
    }

    #[test]
    fn test_tags_response_parses() {
        let json = r#"{"models": [{"name": "llama3.2:latest", "size": 123}]}"#;
        let tags: TagsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(tags.models.len(), 1);
        assert_eq!(tags.models[0].name, "llama3.2:latest");
    }

    #[test]
    fn test_tags_response_empty() {
        let tags: TagsResponse = serde_json::from_str("{}").unwrap();
        assert!(tags.models.is_empty());
    }

    #[tokio::test]
    async fn test_inference_permit_granted_in_arrival_order() {
        use std::sync::Arc;

        let provider = Arc::new(LocalProvider::new(
            "local",
            "http://localhost:11434",
            "ollama",
            vec![],
        ));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        // Hold the permit so every waiter has to queue behind it.
        let held = provider.inference_lock.lock().await;

        let mut handles = Vec::new();
        for i in 0..3u32 {
            let provider = provider.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _permit = provider.inference_lock.lock().await;
                order.lock().unwrap().push(i);
            }));
            // Let the task enqueue before the next one spawns.
            tokio::task::yield_now().await;
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
