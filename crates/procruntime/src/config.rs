use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const ENV_TASK_TIMEOUT_MS: &str = "PROCFLOW_TASK_TIMEOUT_MS";
pub const ENV_JOIN_TIMEOUT_MS: &str = "PROCFLOW_JOIN_TIMEOUT_MS";
pub const ENV_MAX_PARALLEL_BRANCHES: &str = "PROCFLOW_MAX_PARALLEL_BRANCHES";
pub const ENV_SPAN_BUFFER_SIZE: &str = "PROCFLOW_SPAN_BUFFER_SIZE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// Configuration for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-attempt handler timeout, unless the task sets its own
    pub task_timeout_ms: u64,
    /// How long a join barrier may wait after its first arrival
    pub join_timeout_ms: u64,
    /// Service tasks of one instance allowed in flight at once; 1 is sequential
    pub max_parallel_branches: usize,
    /// Capacity of the live span broadcast channel
    pub span_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_timeout_ms: 30_000,
            join_timeout_ms: 60_000,
            max_parallel_branches: 1,
            span_buffer_size: 1000,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()
    }

    /// Defaults overridden by `PROCFLOW_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_TASK_TIMEOUT_MS) {
            self.task_timeout_ms = parse_override(ENV_TASK_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_JOIN_TIMEOUT_MS) {
            self.join_timeout_ms = parse_override(ENV_JOIN_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_PARALLEL_BRANCHES) {
            self.max_parallel_branches = parse_override(ENV_MAX_PARALLEL_BRANCHES, &value)?;
        }
        if let Some(value) = lookup(ENV_SPAN_BUFFER_SIZE) {
            self.span_buffer_size = parse_override(ENV_SPAN_BUFFER_SIZE, &value)?;
        }
        self.validate()
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_parallel_branches == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_parallel_branches".to_string(),
                value: "0".to_string(),
            });
        }
        if self.span_buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "span_buffer_size".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(self)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.task_timeout(), Duration::from_secs(30));
        assert_eq!(config.join_timeout(), Duration::from_secs(60));
        assert_eq!(config.max_parallel_branches, 1);
        assert_eq!(config.span_buffer_size, 1000);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_parallel_branches": 4}"#).unwrap();
        assert_eq!(config.max_parallel_branches, 4);
        assert_eq!(config.task_timeout_ms, 30_000);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [(ENV_TASK_TIMEOUT_MS, "250"), (ENV_MAX_PARALLEL_BRANCHES, " 8 ")]
            .into_iter()
            .collect();
        let config = EngineConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.task_timeout_ms, 250);
        assert_eq!(config.max_parallel_branches, 8);
        assert_eq!(config.join_timeout_ms, 60_000);
    }

    #[test]
    fn test_invalid_override() {
        let err = EngineConfig::default()
            .with_overrides(|key| (key == ENV_JOIN_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == ENV_JOIN_TIMEOUT_MS));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let err = EngineConfig::default()
            .with_overrides(|key| (key == ENV_MAX_PARALLEL_BRANCHES).then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
