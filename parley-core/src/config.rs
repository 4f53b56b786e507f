use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::collections::HashMap;

use crate::providers::{ProviderConfig, ProviderKind};
use crate::trace::SinkConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct ParleyConfig {
    pub service: ServiceConfig,
    pub chat: ChatConfig,
    pub providers: HashMap<String, ProviderSettings>,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub default_provider: String,
}

/// One `[providers.<name>]` table. `options` is forwarded verbatim to the
/// provider request body and trace metadata, never parsed here.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key: Option<String>,
    pub instructions: Option<String>,
    #[serde(default = "default_options")]
    pub options: serde_json::Value,
    pub max_tokens: Option<u32>,
}

fn default_options() -> serde_json::Value {
    serde_json::json!({})
}

impl ProviderSettings {
    /// Resolve into an adapter configuration, pulling the API key from the
    /// provider's environment variable when the file carries none.
    pub fn resolve(&self) -> ProviderConfig {
        let mut config = ProviderConfig::new(self.kind, self.api_key.clone(), self.model.clone());
        config.instructions = self.instructions.clone();
        if self.options.is_object() {
            config.options = self.options.clone();
        }
        if let Some(max_tokens) = self.max_tokens {
            config.max_tokens = max_tokens;
        }
        config
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TraceConfig {
    pub enabled: bool,
    pub host: Option<String>,
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: None,
            public_key: None,
            secret_key: None,
        }
    }
}

impl TraceConfig {
    /// Sink configuration, or `None` when tracing is disabled outright.
    /// Credentials fall back to the `LANGFUSE_*` environment variables.
    pub fn sink_config(&self) -> Option<SinkConfig> {
        if !self.enabled {
            return None;
        }
        Some(SinkConfig::new(
            self.public_key.clone(),
            self.secret_key.clone(),
            self.host.clone(),
        ))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

impl ParleyConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}
