//! Query flow - the staged scheduler and reducer the executor feeds
//!
//! The executor never blocks: it submits closures onto the flow's stages and
//! reports every outcome through it.

use crate::aggregation::AggregatorSpec;
use crate::error::QueryError;
use rusts_core::TagValueId;
use std::collections::HashMap;
use std::fmt;

/// Work submitted to a stage
pub type StageTask = Box<dyn FnOnce() + Send + 'static>;

/// Stages of a storage query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Filtering,
    Grouping,
    Load,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Filtering => "filtering",
            Stage::Grouping => "grouping",
            Stage::Load => "load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Staged scheduler plus result reducer of one storage query.
///
/// Contract:
/// - `filtering`, `grouping` and `load` run the task asynchronously; they
///   must not run it inline on the caller's stack.
/// - `complete` reports a fatal error. The executor may call it more than
///   once when several branches fail concurrently; implementations decide
///   which report wins and must tolerate the rest.
/// - `reduce_tag_values` is called exactly once per group-by tag key, with
///   the key's index in the query's group-by list.
pub trait QueryFlow: Send + Sync {
    /// Receive the downsampling/aggregation specs before any stage work
    fn prepare(&self, specs: Vec<AggregatorSpec>);

    /// Schedule a filtering task
    fn filtering(&self, task: StageTask);

    /// Schedule a grouping task
    fn grouping(&self, task: StageTask);

    /// Schedule a load task
    fn load(&self, task: StageTask);

    /// Report a fatal error
    fn complete(&self, err: QueryError);

    /// Deliver the resolved tag values of one group-by key
    fn reduce_tag_values(&self, tag_index: usize, tag_values: HashMap<TagValueId, String>);
}
