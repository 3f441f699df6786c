//! Per-query execution context shared by every stage task

use crate::config::QueryConfig;
use crate::error::Result;
use crate::model::StorageQuery;
use crate::stats::{StorageStats, TaskKind, TaskStat};
use parking_lot::Mutex;
use rusts_core::ShardId;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Immutable parameters of one storage query plus its stats sink
#[derive(Debug)]
pub struct StorageExecuteContext {
    query: StorageQuery,
    shard_ids: Vec<ShardId>,
    cancel: Option<CancellationToken>,
    slow_task_threshold: Duration,
    stats: Option<Mutex<StorageStats>>,
}

impl StorageExecuteContext {
    /// Create a context for `query` over `shard_ids`
    pub fn new(query: StorageQuery, shard_ids: Vec<ShardId>) -> Self {
        let stats = query.explain.then(|| Mutex::new(StorageStats::new()));
        Self {
            query,
            shard_ids,
            cancel: None,
            slow_task_threshold: QueryConfig::default().slow_task_threshold(),
            stats,
        }
    }

    /// Apply engine configuration
    pub fn with_config(mut self, config: &QueryConfig) -> Self {
        self.slow_task_threshold = config.slow_task_threshold();
        if config.collect_stats && self.stats.is_none() {
            self.stats = Some(Mutex::new(StorageStats::new()));
        }
        self
    }

    /// Attach a caller-owned cancellation token. Stage tasks started after
    /// the token is cancelled skip their work.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn query(&self) -> &StorageQuery {
        &self.query
    }

    pub fn shard_ids(&self) -> &[ShardId] {
        &self.shard_ids
    }

    /// Check whether the caller cancelled this query
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|token| token.is_cancelled())
    }

    /// Snapshot of the collected stats, if stats are enabled
    pub fn stats(&self) -> Option<StorageStats> {
        self.stats.as_ref().map(|stats| stats.lock().clone())
    }

    /// Run a task, timing it and recording the outcome
    pub(crate) fn track<T>(
        &self,
        kind: TaskKind,
        shard: Option<ShardId>,
        task: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = task();
        let elapsed = start.elapsed();

        let ok = match &result {
            Ok(_) => true,
            Err(err) => err.is_not_found(),
        };

        if elapsed >= self.slow_task_threshold {
            warn!(task = %kind, ?shard, ?elapsed, "slow storage task");
        } else {
            trace!(task = %kind, ?shard, ?elapsed, ok, "storage task finished");
        }

        if let Some(stats) = &self.stats {
            stats.lock().record(TaskStat {
                kind,
                shard,
                elapsed,
                ok,
            });
        }

        result
    }
}
