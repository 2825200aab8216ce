//! Provider registry: one uniform chat operation over N backends

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    providers::{ChatProvider, cloud::CloudProvider, get_api_key, local::LocalProvider},
    types::{ChatRequest, ChatResponse, ModelSpec},
};

/// Deadline for a single health probe
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A parsed `"provider/model"` path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPath {
    pub provider: String,
    pub model: String,
}

impl ModelPath {
    /// Parse a `"provider/model"` path
    pub fn parse(path: &str) -> Result<Self> {
        let (provider, model) = path.split_once('/').ok_or_else(|| {
            Error::InvalidConfig(format!(
                "model path '{}' must be of the form provider/model",
                path
            ))
        })?;
        if provider.is_empty() || model.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "model path '{}' has an empty provider or model",
                path
            )));
        }
        Ok(Self {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }
}

impl std::fmt::Display for ModelPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Kind of backend a config entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Cloud,
    Local,
}

/// Configuration for one provider entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Name the provider is registered under
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Explicit API key (cloud); prefer the env var
    pub api_key: Option<String>,
    /// Environment variable holding the API key (cloud)
    pub api_key_env: Option<String>,
    /// Loader CLI for on-device models (local), defaults to "ollama"
    pub loader_bin: Option<String>,
    /// Models this provider serves
    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

impl ProviderConfig {
    fn instantiate(&self) -> Result<Arc<dyn ChatProvider>> {
        match self.kind {
            ProviderKind::Cloud => {
                let env_var = self.api_key_env.as_deref().unwrap_or("PHAROS_API_KEY");
                let api_key = get_api_key(self.api_key.as_deref(), env_var)?;
                Ok(Arc::new(CloudProvider::new(
                    &self.name,
                    &self.base_url,
                    api_key,
                    self.models.clone(),
                )))
            }
            ProviderKind::Local => Ok(Arc::new(LocalProvider::new(
                &self.name,
                &self.base_url,
                self.loader_bin.as_deref().unwrap_or("ollama"),
                self.models.clone(),
            ))),
        }
    }
}

/// Routes chat requests to registered backends by provider name,
/// with a designated primary.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    primary: ModelPath,
}

impl ProviderRegistry {
    /// Build a registry from configuration.
    ///
    /// Each entry is instantiated independently; an entry that fails is
    /// logged and skipped. The primary provider must end up registered
    /// or construction fails.
    pub fn build(configs: &[ProviderConfig], primary: &str) -> Result<Self> {
        let mut providers: Vec<Arc<dyn ChatProvider>> = Vec::new();
        for config in configs {
            match config.instantiate() {
                Ok(provider) => providers.push(provider),
                Err(e) => {
                    tracing::warn!(provider = %config.name, error = %e, "skipping provider that failed to initialize");
                }
            }
        }
        Self::from_providers(providers, primary)
    }

    /// Build a registry from already-constructed providers.
    pub fn from_providers(providers: Vec<Arc<dyn ChatProvider>>, primary: &str) -> Result<Self> {
        let primary = ModelPath::parse(primary)?;
        let providers: HashMap<String, Arc<dyn ChatProvider>> = providers
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();

        // Misconfiguration surfaces at startup, not at first request.
        if !providers.contains_key(&primary.provider) {
            return Err(Error::InvalidConfig(format!(
                "primary provider '{}' is not registered",
                primary.provider
            )));
        }

        Ok(Self { providers, primary })
    }

    /// The configured primary provider/model path
    pub fn primary(&self) -> &ModelPath {
        &self.primary
    }

    /// Send a chat request to the primary provider/model
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let provider = self
            .providers
            .get(&self.primary.provider)
            .ok_or_else(|| Error::UnknownProvider(self.primary.provider.clone()))?;
        provider.chat(&self.primary.model, request).await
    }

    /// Send a chat request to a specific `"provider/model"` path
    pub async fn chat_with_model(&self, path: &str, request: &ChatRequest) -> Result<ChatResponse> {
        let path = ModelPath::parse(path)?;
        let provider = self
            .providers
            .get(&path.provider)
            .ok_or_else(|| Error::UnknownProvider(path.provider.clone()))?;
        provider.chat(&path.model, request).await
    }

    /// Probe every provider concurrently; one dead provider never blocks
    /// reporting on the others.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let probes = self.providers.iter().map(|(name, provider)| {
            let name = name.clone();
            let provider = provider.clone();
            async move {
                let healthy =
                    match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, provider.health()).await {
                        Ok(Ok(())) => true,
                        Ok(Err(e)) => {
                            tracing::debug!(provider = %name, error = %e, "health probe failed");
                            false
                        }
                        Err(_) => false,
                    };
                (name, healthy)
            }
        });

        join_all(probes).await.into_iter().collect()
    }

    /// Names of all registered providers, sorted
    pub fn list_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up the spec for a `"provider/model"` path
    pub fn model_spec(&self, path: &str) -> Option<ModelSpec> {
        let path = ModelPath::parse(path).ok()?;
        self.providers
            .get(&path.provider)?
            .models()
            .iter()
            .find(|m| m.id == path.model)
            .cloned()
    }
}
