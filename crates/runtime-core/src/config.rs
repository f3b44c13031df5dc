// Typed configuration, loaded from the environment the way RunnerConfig::from_env
// does in the teacher's api binary - a flat struct with sane defaults, deserialized
// via `envy` rather than hand-rolled `std::env::var` parsing.

use serde::Deserialize;

use crate::error::{Result, RuntimeError};

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultAgentConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
}

impl Default for DefaultAgentConfig {
    fn default() -> Self {
        Self {
            name: Some("agent".to_string()),
            description: None,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub base_path: String,
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub request_timeout_ms: u64,
    pub consumer_ttl_hours: i64,
    pub event_ttl_hours: i64,
    pub delivery_queue_high_water_mark: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_path: "./data".to_string(),
            bind_addr: "0.0.0.0:9000".to_string(),
            database_url: None,
            request_timeout_ms: 30_000,
            consumer_ttl_hours: 24,
            event_ttl_hours: 48,
            delivery_queue_high_water_mark: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Loads from environment variables with the `RUNTIME_` prefix (e.g.
    /// `RUNTIME_BIND_ADDR`), falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        match envy::prefixed("RUNTIME_").from_env::<RuntimeConfig>() {
            Ok(cfg) => Ok(cfg),
            Err(envy::Error::MissingValue(_)) => Ok(RuntimeConfig::default()),
            Err(err) => Err(RuntimeError::config(err.to_string())),
        }
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }
}
