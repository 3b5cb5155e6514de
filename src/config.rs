use crate::core::forwarder::DEFAULT_MAX_CONNECT_ATTEMPTS;
use crate::core::policy::POLICY_NAMES;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listener: ListenerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    #[serde(rename = "type", default = "default_policy_type")]
    pub policy_type: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            policy_type: default_policy_type(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopologyConfig {
    #[serde(default = "default_quarantine_ms")]
    pub quarantine_ms: u64,
    /// File holding the pool snapshot; kept up to date after every change
    #[serde(default)]
    pub snapshot_file: Option<String>,
    /// Seed snapshot used when no snapshot file exists yet
    #[serde(default)]
    pub initial_pool: Option<Vec<String>>,
}

impl TopologyConfig {
    pub fn quarantine(&self) -> Duration {
        Duration::from_millis(self.quarantine_ms)
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            quarantine_ms: default_quarantine_ms(),
            snapshot_file: None,
            initial_pool: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardingConfig {
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: usize,
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl ForwardingConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            max_connect_attempts: default_max_connect_attempts(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

fn default_policy_type() -> String {
    "round_robin".to_string()
}
fn default_quarantine_ms() -> u64 {
    2000
}
fn default_max_connect_attempts() -> usize {
    DEFAULT_MAX_CONNECT_ATTEMPTS
}
fn default_drain_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from a YAML file
    pub async fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string (useful for testing)
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for common errors
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listener.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "Listener bind '{}' is not a socket address",
                self.listener.bind
            )));
        }

        if !POLICY_NAMES.contains(&self.policy.policy_type.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Unknown policy '{}', expected one of {:?}",
                self.policy.policy_type, POLICY_NAMES
            )));
        }

        if self.forwarding.max_connect_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_connect_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
