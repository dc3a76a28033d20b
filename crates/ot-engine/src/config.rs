/// Engine configuration
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{DocumentType, EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Documents with no attached users are evicted after this long without changes
    pub idle_timeout_secs: u64,

    /// History length that triggers compaction
    pub history_ceiling: usize,

    /// Operations kept after compaction
    pub history_window: usize,

    /// Period of the background maintenance sweep
    pub maintenance_interval_secs: u64,

    /// Event channel capacity; slow subscribers lag beyond this
    pub event_capacity: usize,

    /// Type of documents created implicitly on join
    pub default_document_type: DocumentType,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            history_ceiling: 1000,
            history_window: 500,
            maintenance_interval_secs: 60,
            event_capacity: 1000,
            default_document_type: DocumentType::Text,
        }
    }
}

impl EngineConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_window > self.history_ceiling {
            return Err(EngineError::InvalidConfig(format!(
                "history_window ({}) must not exceed history_ceiling ({})",
                self.history_window, self.history_ceiling
            )));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "maintenance_interval_secs must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "event_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
