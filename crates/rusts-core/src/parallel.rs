//! Stage parallelism configuration.
//!
//! A storage query runs in three stages (filtering, grouping, load), each on
//! its own worker pool. This module sizes those pools.

use serde::{Deserialize, Serialize};

/// Configuration for the per-stage worker pools of a query flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Number of threads running per-shard filtering tasks.
    /// Set to 0 to use the number of CPU cores.
    /// Default: 0 (CPU cores)
    pub filtering_threads: usize,

    /// Number of threads running grouping tasks.
    /// Set to 0 to use the number of CPU cores.
    /// Default: 0 (CPU cores)
    pub grouping_threads: usize,

    /// Number of threads running data load and tag value collection tasks.
    /// Set to 0 to use the number of CPU cores.
    /// Default: 0 (CPU cores)
    pub load_threads: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            filtering_threads: 0,
            grouping_threads: 0,
            load_threads: 0,
        }
    }
}

impl ParallelConfig {
    /// Creates a new ParallelConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective filtering pool size.
    pub fn effective_filtering_threads(&self) -> usize {
        effective(self.filtering_threads)
    }

    /// Effective grouping pool size.
    pub fn effective_grouping_threads(&self) -> usize {
        effective(self.grouping_threads)
    }

    /// Effective load pool size.
    pub fn effective_load_threads(&self) -> usize {
        effective(self.load_threads)
    }

    /// Creates a configuration with a single thread per stage.
    pub fn sequential() -> Self {
        Self {
            filtering_threads: 1,
            grouping_threads: 1,
            load_threads: 1,
        }
    }

    /// Builder method to set the filtering pool size.
    pub fn with_filtering_threads(mut self, threads: usize) -> Self {
        self.filtering_threads = threads;
        self
    }

    /// Builder method to set the grouping pool size.
    pub fn with_grouping_threads(mut self, threads: usize) -> Self {
        self.grouping_threads = threads;
        self
    }

    /// Builder method to set the load pool size.
    pub fn with_load_threads(mut self, threads: usize) -> Self {
        self.load_threads = threads;
        self
    }
}

fn effective(threads: usize) -> usize {
    if threads == 0 {
        num_cpus::get()
    } else {
        threads
    }
}
