//! Per-task execution stats collected for explain queries

use rusts_core::ShardId;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Kind of storage task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Plan,
    TagSearch,
    SeriesSearch,
    MemoryFilter,
    FileFilter,
    GroupingContext,
    BuildGroup,
    DataLoad,
    CollectTagValues,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Plan => "plan",
            TaskKind::TagSearch => "tag_search",
            TaskKind::SeriesSearch => "series_search",
            TaskKind::MemoryFilter => "memory_filter",
            TaskKind::FileFilter => "file_filter",
            TaskKind::GroupingContext => "grouping_context",
            TaskKind::BuildGroup => "build_group",
            TaskKind::DataLoad => "data_load",
            TaskKind::CollectTagValues => "collect_tag_values",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One task run
#[derive(Debug, Clone, Serialize)]
pub struct TaskStat {
    pub kind: TaskKind,
    /// `None` for query-wide tasks (plan, tag search, tag value collection)
    pub shard: Option<ShardId>,
    pub elapsed: Duration,
    /// `false` if the task returned an error other than not-found
    pub ok: bool,
}

/// Stats of one storage query
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    tasks: Vec<TaskStat>,
}

impl StorageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stat: TaskStat) {
        self.tasks.push(stat);
    }

    /// All recorded runs in completion order
    pub fn tasks(&self) -> &[TaskStat] {
        &self.tasks
    }

    /// Number of runs of a task kind
    pub fn count(&self, kind: TaskKind) -> usize {
        self.tasks.iter().filter(|t| t.kind == kind).count()
    }

    /// Total time spent in a task kind
    pub fn elapsed(&self, kind: TaskKind) -> Duration {
        self.tasks
            .iter()
            .filter(|t| t.kind == kind)
            .map(|t| t.elapsed)
            .sum()
    }

    /// Number of failed runs
    pub fn failures(&self) -> usize {
        self.tasks.iter().filter(|t| !t.ok).count()
    }
}
