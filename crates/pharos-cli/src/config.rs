//! Configuration file support

use pharos_ai::{ModelSpec, ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for pharos
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Primary route as "provider/model"
    pub primary: String,
    /// Optional "provider/model" override for chat turns
    pub model: Option<String>,
    /// System prompt text; overrides the built-in default
    pub system_prompt: Option<String>,
    /// Most recent messages sent as context
    pub history_limit: Option<usize>,
    /// Script interpreter for session execution
    pub interpreter: Option<String>,
    /// Provider entries, tried independently at startup
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            primary: "local/llama3.2".to_string(),
            model: None,
            system_prompt: None,
            history_limit: None,
            interpreter: None,
            providers: vec![ProviderConfig {
                name: "local".to_string(),
                kind: ProviderKind::Local,
                base_url: "http://localhost:11434".to_string(),
                api_key: None,
                api_key_env: None,
                loader_bin: None,
                models: vec![ModelSpec::text("llama3.2")],
            }],
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pharos")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for PHAROS_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("PHAROS_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        Config::default().save()?;
        Ok(path)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# pharos configuration file
# Place at ~/.config/pharos/config.toml (Linux/Mac), or set PHAROS_CONFIG_PATH

# Primary route as "provider/model"
primary = "local/llama3.2"

# Most recent messages sent as chat context
# history_limit = 40

# Script interpreter for session execution (default: sh)
# interpreter = "sh"

# On-device provider served through an Ollama-compatible API
[[providers]]
name = "local"
kind = "local"
base_url = "http://localhost:11434"
# loader_bin = "ollama"

[[providers.models]]
id = "llama3.2"
name = "llama3.2"

# Cloud provider speaking the chat-completions protocol
# [[providers]]
# name = "cloud"
# kind = "cloud"
# base_url = "https://api.example.com/v1"
# api_key_env = "PHAROS_API_KEY"
#
# [[providers.models]]
# id = "large-model"
# name = "large-model"
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_local_primary() {
        let config = Config::default();
        assert_eq!(config.primary, "local/llama3.2");
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].kind, ProviderKind::Local);
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.primary, "local/llama3.2");
        assert_eq!(config.providers[0].models[0].id, "llama3.2");
    }

    #[test]
    fn test_round_trip() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.primary, config.primary);
        assert_eq!(parsed.providers.len(), config.providers.len());
    }
}
