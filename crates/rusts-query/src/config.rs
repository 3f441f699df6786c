//! Query engine configuration
//!
//! Loaded from YAML, e.g.
//!
//! ```yaml
//! parallel:
//!   filtering_threads: 4
//!   grouping_threads: 4
//!   load_threads: 8
//! slow_task_threshold_ms: 500
//! collect_stats: false
//! ```

use crate::error::{QueryError, Result};
use rusts_core::ParallelConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Storage query engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Stage worker pool sizes
    pub parallel: ParallelConfig,
    /// Tasks running longer than this are logged at warn level
    pub slow_task_threshold_ms: u64,
    /// Collect per-task stats for every query, not only explain queries
    pub collect_stats: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            parallel: ParallelConfig::default(),
            slow_task_threshold_ms: 1000,
            collect_stats: false,
        }
    }
}

impl QueryConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            QueryError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| QueryError::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Slow task threshold as a duration
    pub fn slow_task_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_task_threshold_ms)
    }
}
