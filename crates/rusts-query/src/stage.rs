//! Thread-pool backed query flow
//!
//! Each stage runs on its own rayon pool so a burst of load work cannot
//! starve filtering. The flow counts outstanding tasks; `wait` is for the
//! caller that owns the query, never for stage tasks.

use crate::aggregation::AggregatorSpec;
use crate::error::{QueryError, Result};
use crate::flow::{QueryFlow, Stage, StageTask};
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use rusts_core::{ParallelConfig, TagValueId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What a finished storage query produced
#[derive(Debug, Default, Clone)]
pub struct FlowOutcome {
    /// Aggregator specs received from `prepare`
    pub specs: Vec<AggregatorSpec>,
    /// Reduced tag values in call order, keyed by group-by index
    pub tag_values: Vec<(usize, HashMap<TagValueId, String>)>,
}

impl FlowOutcome {
    /// Tag values reduced for group-by key `tag_index`
    pub fn tag_values_of(&self, tag_index: usize) -> Option<&HashMap<TagValueId, String>> {
        self.tag_values
            .iter()
            .find(|(idx, _)| *idx == tag_index)
            .map(|(_, values)| values)
    }
}

#[derive(Default)]
struct FlowState {
    pending: Mutex<usize>,
    idle: Condvar,
    error: Mutex<Option<QueryError>>,
    outcome: Mutex<FlowOutcome>,
}

impl FlowState {
    fn begin(&self) {
        *self.pending.lock() += 1;
    }

    fn finish(&self) {
        let mut pending = self.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

/// Marks one stage task finished when dropped
struct TaskDone(Arc<FlowState>);

impl Drop for TaskDone {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Query flow running each stage on a dedicated rayon pool
pub struct StageQueryFlow {
    filtering: ThreadPool,
    grouping: ThreadPool,
    load: ThreadPool,
    state: Arc<FlowState>,
}

impl StageQueryFlow {
    /// Build the stage pools
    pub fn new(config: &ParallelConfig) -> Result<Self> {
        Ok(Self {
            filtering: build_pool(Stage::Filtering, config.effective_filtering_threads())?,
            grouping: build_pool(Stage::Grouping, config.effective_grouping_threads())?,
            load: build_pool(Stage::Load, config.effective_load_threads())?,
            state: Arc::new(FlowState::default()),
        })
    }

    /// Block until no stage task is outstanding, then hand back the first
    /// reported error or what the query produced
    pub fn wait(&self) -> Result<FlowOutcome> {
        let mut pending = self.state.pending.lock();
        while *pending > 0 {
            self.state.idle.wait(&mut pending);
        }
        drop(pending);

        let outcome = std::mem::take(&mut *self.state.outcome.lock());
        match self.state.error.lock().take() {
            Some(err) => Err(err),
            None => Ok(outcome),
        }
    }

    fn spawn(&self, stage: Stage, pool: &ThreadPool, task: StageTask) {
        self.state.begin();
        let done = TaskDone(Arc::clone(&self.state));
        pool.spawn(move || {
            let _done = done;
            trace!(%stage, "stage task started");
            task();
        });
    }
}

fn build_pool(stage: Stage, threads: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |idx| format!("query-{}-{}", stage, idx))
        .build()
        .map_err(|e| QueryError::Execution(format!("failed to build {} pool: {}", stage, e)))
}

impl QueryFlow for StageQueryFlow {
    fn prepare(&self, specs: Vec<AggregatorSpec>) {
        debug!(fields = specs.len(), "query flow prepared");
        self.state.outcome.lock().specs = specs;
    }

    fn filtering(&self, task: StageTask) {
        self.spawn(Stage::Filtering, &self.filtering, task);
    }

    fn grouping(&self, task: StageTask) {
        self.spawn(Stage::Grouping, &self.grouping, task);
    }

    fn load(&self, task: StageTask) {
        self.spawn(Stage::Load, &self.load, task);
    }

    fn complete(&self, err: QueryError) {
        let mut first = self.state.error.lock();
        match first.as_ref() {
            None => {
                debug!(error = %err, "storage query failed");
                *first = Some(err);
            }
            Some(kept) => warn!(error = %err, first = %kept, "dropping duplicate query error"),
        }
    }

    fn reduce_tag_values(&self, tag_index: usize, tag_values: HashMap<TagValueId, String>) {
        trace!(tag_index, values = tag_values.len(), "reduce tag values");
        self.state.outcome.lock().tag_values.push((tag_index, tag_values));
    }
}
