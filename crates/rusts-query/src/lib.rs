//! RusTs Query - storage-node query execution
//!
//! This crate runs the storage side of a distributed query:
//! - Storage query model and execute plan
//! - Filter, grouping and load stages fanned out per shard and per
//!   series container
//! - Single-fire collection of group-by tag values
//! - A rayon-backed query flow and per-task execution stats

pub mod aggregation;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod flow;
pub mod model;
pub mod planner;
pub mod stage;
pub mod stats;
pub mod storage;
pub mod task;

pub use aggregation::{AggregateFunction, AggregatorSpec};
pub use config::QueryConfig;
pub use context::StorageExecuteContext;
pub use error::{QueryError, Result, ValidationError};
pub use executor::StorageExecutor;
pub use flow::{QueryFlow, Stage, StageTask};
pub use model::{FieldSelection, StorageQuery, StorageQueryBuilder, TagFilter};
pub use planner::StorageExecutePlan;
pub use stage::{FlowOutcome, StageQueryFlow};
pub use stats::{StorageStats, TaskKind, TaskStat};
pub use storage::{Database, Metadata, Shard};
pub use task::{
    DataLoader, FilterResult, FilterResultSet, GroupedSeries, GroupingContext,
    SeriesResultLoader, StorageTasks, TagSearchResult,
};
