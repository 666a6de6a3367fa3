//! Engine Configuration
//!
//! Knobs shared by every session the process runs. Loaded from an optional
//! JSON file; missing fields keep their defaults.
//!
//! ```json
//! { "tick_interval_ms": 10, "max_sub_step_ms": 10, "max_clock_lead_ms": 5000 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::simulator::Millis;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid JSON for [`EngineConfig`].
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
}

/// Synchronization engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of each session's tick loop.
    pub tick_interval_ms: u64,
    /// Longest duration handed to a single `frame` call.
    pub max_sub_step_ms: Millis,
    /// Hash the canonical snapshot around every scratch replay to catch
    /// `copy_snapshot` implementations that share state.
    pub verify_snapshot_copies: bool,
    /// Capacity of each session's inbound command queue.
    pub command_queue: usize,
    /// Furthest a reported clock may run ahead of the canonical snapshot.
    /// Bounds the simulated time one message can make the server replay.
    pub max_clock_lead_ms: Millis,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
            max_sub_step_ms: 10,
            verify_snapshot_copies: cfg!(debug_assertions),
            command_queue: 256,
            max_clock_lead_ms: 10_000,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_interval_ms",
                reason: "must be positive",
            });
        }
        if self.max_sub_step_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "max_sub_step_ms",
                reason: "must be positive",
            });
        }
        if self.max_clock_lead_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "max_clock_lead_ms",
                reason: "must be positive",
            });
        }
        if self.command_queue == 0 {
            return Err(ConfigError::Invalid {
                field: "command_queue",
                reason: "must be positive",
            });
        }
        Ok(())
    }

    /// Tick period as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
