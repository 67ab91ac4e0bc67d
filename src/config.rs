use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Runtime limits. Every field has a default so partial JSON files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Wall-clock budget of one scheduler tick, in milliseconds.
    pub tick_budget_ms: u64,
    /// Capacity of the execution queue.
    pub queue_capacity: usize,
    /// Depth of the evaluator operand stack.
    pub stack_capacity: usize,
    /// Capacity of the request channel feeding the SCPI worker thread.
    pub scpi_channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_budget_ms: 20,
            queue_capacity: 1000,
            stack_capacity: 20,
            scpi_channel_capacity: 4,
        }
    }
}

impl RuntimeConfig {
    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_budget_ms)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}
