//! Storage executor
//!
//! Runs one storage query on a storage node. Validation and plan building
//! happen on the caller's thread; everything after is submitted to the
//! query flow as filter, grouping and load closures. Fan-in is detected with
//! two pending counters and a single-fire `collecting` guard: whichever
//! closure observes both counters at zero and wins the CAS collects the
//! group-by tag values. Nothing in here blocks.

use crate::context::StorageExecuteContext;
use crate::error::{QueryError, Result, ValidationError};
use crate::flow::QueryFlow;
use crate::planner::StorageExecutePlan;
use crate::stats::TaskKind;
use crate::storage::{Database, Metadata, Shard};
use crate::task::{
    FilterResultSet, GroupingContext, SeriesResultLoader, StorageTasks, TagSearchResult,
};
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use rusts_core::{ShardId, TagKeyId, TagMeta};
use rusts_index::{partition, SeriesContainer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Executes one storage query against the shards of one database.
///
/// Consumed by [`StorageExecutor::execute`]; a new executor is built per
/// query. All outcomes surface through the [`QueryFlow`].
pub struct StorageExecutor {
    flow: Arc<dyn QueryFlow>,
    database: Arc<dyn Database>,
    ctx: Arc<StorageExecuteContext>,
    tasks: Arc<dyn StorageTasks>,
}

impl StorageExecutor {
    pub fn new(
        flow: Arc<dyn QueryFlow>,
        database: Arc<dyn Database>,
        ctx: Arc<StorageExecuteContext>,
        tasks: Arc<dyn StorageTasks>,
    ) -> Self {
        Self {
            flow,
            database,
            ctx,
            tasks,
        }
    }

    /// Validate, plan and start the query pipeline
    pub fn execute(self) {
        let shards = match self.resolve_shards() {
            Ok(shards) => shards,
            Err(err) => {
                debug!(shard_ids = ?self.ctx.shard_ids(), error = %err, "storage query rejected");
                self.flow.complete(err.into());
                return;
            }
        };

        let metadata = self.database.metadata();
        let plan = match self.ctx.track(TaskKind::Plan, None, || {
            self.tasks.build_plan(&self.ctx, metadata.as_ref())
        }) {
            Ok(plan) => plan,
            Err(err) => {
                debug!(metric = %self.ctx.query().metric_name, error = %err, "build storage plan failed");
                self.flow.complete(err);
                return;
            }
        };

        let tag_search = if self.ctx.query().condition().is_some() {
            match self.ctx.track(TaskKind::TagSearch, None, || {
                self.tasks.tag_search(&self.ctx, &plan, metadata.as_ref())
            }) {
                Ok(result) => Some(result),
                Err(err) => {
                    debug!(metric = %self.ctx.query().metric_name, error = %err, "tag search failed");
                    self.flow.complete(err);
                    return;
                }
            }
        } else {
            None
        };

        self.flow.prepare(plan.aggregator_specs());

        let tag_value_ids = vec![RoaringBitmap::new(); plan.group_by_tags().len()];
        let pipeline = Arc::new(Pipeline {
            flow: self.flow,
            ctx: self.ctx,
            tasks: self.tasks,
            metadata,
            plan,
            tag_search,
            pending_for_shard: AtomicI32::new(0),
            pending_for_grouping: AtomicI32::new(0),
            collecting: AtomicBool::new(false),
            tag_value_ids: Mutex::new(tag_value_ids),
        });
        pipeline.execute_query(shards);
    }

    fn resolve_shards(&self) -> std::result::Result<Vec<Arc<dyn Shard>>, ValidationError> {
        let shard_ids = self.ctx.shard_ids();
        validate(shard_ids, self.database.num_of_shards())?;

        let shards: Vec<Arc<dyn Shard>> = shard_ids
            .iter()
            .filter_map(|id| self.database.get_shard(*id))
            .collect();
        check_shards(shards.len(), shard_ids.len())?;
        Ok(shards)
    }
}

/// Check the requested shard ids against the database's shard count
pub fn validate(
    shard_ids: &[ShardId],
    num_of_shards: usize,
) -> std::result::Result<(), ValidationError> {
    if shard_ids.is_empty() {
        return Err(ValidationError::NoShardId);
    }
    if num_of_shards == 0 {
        return Err(ValidationError::NoShardInDatabase);
    }
    if num_of_shards != shard_ids.len() {
        return Err(ValidationError::ShardNotMatch {
            database: num_of_shards,
            requested: shard_ids.len(),
        });
    }
    Ok(())
}

/// Check how many of the requested shards were resolved
pub fn check_shards(
    found: usize,
    requested: usize,
) -> std::result::Result<(), ValidationError> {
    if found == 0 {
        return Err(ValidationError::ShardNotFound);
    }
    if found != requested {
        return Err(ValidationError::ShardNumNotMatch { found, requested });
    }
    Ok(())
}

/// Union per-key tag value ids into `target`
pub fn merge_tag_value_ids(target: &mut [RoaringBitmap], tag_value_ids: Vec<RoaringBitmap>) {
    for (merged, ids) in target.iter_mut().zip(tag_value_ids) {
        *merged |= ids;
    }
}

/// Query-scoped pipeline state shared by every stage closure
struct Pipeline {
    flow: Arc<dyn QueryFlow>,
    ctx: Arc<StorageExecuteContext>,
    tasks: Arc<dyn StorageTasks>,
    metadata: Arc<dyn Metadata>,
    plan: StorageExecutePlan,
    tag_search: Option<TagSearchResult>,

    /// Shards still in the filtering stage
    pending_for_shard: AtomicI32,
    /// Grouping and load closures in flight, across all shards
    pending_for_grouping: AtomicI32,
    collecting: AtomicBool,
    /// One bitmap per group-by key, union of every shard's tag value ids
    tag_value_ids: Mutex<Vec<RoaringBitmap>>,
}

/// Per-shard state shared by the container closures of one shard
struct ShardScope {
    shard: Arc<dyn Shard>,
    result_set: FilterResultSet,
    grouping: Option<Arc<dyn GroupingContext>>,
    /// Grouping closures of this shard not yet finished
    group_wait: AtomicI32,
}

impl Pipeline {
    fn execute_query(self: &Arc<Self>, shards: Vec<Arc<dyn Shard>>) {
        debug!(
            metric_id = self.plan.metric_id(),
            shards = shards.len(),
            group_by = self.plan.group_by_tags().len(),
            "executing storage query"
        );

        self.pending_for_shard
            .fetch_add(shards.len() as i32, Ordering::SeqCst);
        for shard in shards {
            let pipeline = Arc::clone(self);
            self.flow
                .filtering(Box::new(move || pipeline.filter_shard(shard)));
        }
    }

    fn filter_shard(self: &Arc<Self>, shard: Arc<dyn Shard>) {
        let _exit = OnExit::new(|| {
            self.pending_for_shard.fetch_sub(1, Ordering::SeqCst);
            self.collect_group_by_tag_values();
        });
        let shard_id = shard.id();
        if self.ctx.is_cancelled() {
            trace!(shard_id, "query cancelled, skip filtering");
            return;
        }

        let series_ids = match found(self.ctx.track(TaskKind::SeriesSearch, Some(shard_id), || {
            self.tasks
                .series_search(&self.ctx, shard.as_ref(), &self.plan, self.tag_search.as_ref())
        })) {
            Ok(series_ids) => series_ids.unwrap_or_default(),
            Err(err) => {
                self.flow.complete(err);
                return;
            }
        };
        if series_ids.is_empty() {
            trace!(shard_id, "no series found");
            return;
        }

        let result_set = match self.filter_data(shard.as_ref(), &series_ids) {
            Ok(result_set) => result_set,
            Err(err) => {
                self.flow.complete(err);
                return;
            }
        };
        if result_set.is_empty() {
            trace!(shard_id, "no data found");
            return;
        }

        let series_ids = result_set.series_ids();
        trace!(shard_id, series = series_ids.len(), families = result_set.len(), "shard filtered");

        self.pending_for_grouping.fetch_add(1, Ordering::SeqCst);
        let pipeline = Arc::clone(self);
        self.flow.grouping(Box::new(move || {
            let _exit = OnExit::new(|| {
                pipeline.pending_for_grouping.fetch_sub(1, Ordering::SeqCst);
                pipeline.collect_group_by_tag_values();
            });
            if pipeline.ctx.is_cancelled() {
                return;
            }
            pipeline.execute_group_by(shard, result_set, series_ids);
        }));
    }

    /// Filter the memory database, then the file families. Not-found from
    /// either source just contributes nothing.
    fn filter_data(&self, shard: &dyn Shard, series_ids: &RoaringBitmap) -> Result<FilterResultSet> {
        let shard_id = shard.id();
        let mut result_set = FilterResultSet::new();

        let memory = found(self.ctx.track(TaskKind::MemoryFilter, Some(shard_id), || {
            self.tasks.memory_filter(&self.ctx, shard, &self.plan, series_ids)
        }))?;
        result_set.extend(memory.unwrap_or_default());

        let file = found(self.ctx.track(TaskKind::FileFilter, Some(shard_id), || {
            self.tasks.file_filter(&self.ctx, shard, &self.plan, series_ids)
        }))?;
        result_set.extend(file.unwrap_or_default());

        Ok(result_set)
    }

    fn execute_group_by(
        self: &Arc<Self>,
        shard: Arc<dyn Shard>,
        result_set: FilterResultSet,
        series_ids: RoaringBitmap,
    ) {
        let shard_id = shard.id();
        let grouping = if self.plan.group_by_tags().is_empty() {
            None
        } else {
            let tag_key_ids: Vec<TagKeyId> =
                self.plan.group_by_tags().iter().map(|tag| tag.id).collect();
            match found(self.ctx.track(TaskKind::GroupingContext, Some(shard_id), || {
                self.tasks
                    .grouping_context(&self.ctx, shard.as_ref(), &tag_key_ids, &series_ids)
            })) {
                Ok(Some(grouping)) => Some(grouping),
                Ok(None) => {
                    trace!(shard_id, "grouping context not found");
                    return;
                }
                Err(err) => {
                    self.flow.complete(err);
                    return;
                }
            }
        };

        let containers = partition(&series_ids);
        let scope = Arc::new(ShardScope {
            shard,
            result_set,
            grouping,
            group_wait: AtomicI32::new(containers.len() as i32),
        });

        for container in containers {
            let container = Arc::new(container);
            // one load and one grouping closure per container
            self.pending_for_grouping.fetch_add(2, Ordering::SeqCst);

            let pipeline = Arc::clone(self);
            let load_scope = Arc::clone(&scope);
            let load_container = Arc::clone(&container);
            self.flow.load(Box::new(move || {
                pipeline.load_container(&load_scope, &load_container)
            }));

            let pipeline = Arc::clone(self);
            let group_scope = Arc::clone(&scope);
            self.flow.grouping(Box::new(move || {
                pipeline.build_group(&group_scope, &container)
            }));
        }
    }

    fn load_container(self: &Arc<Self>, scope: &ShardScope, container: &SeriesContainer) {
        let _exit = OnExit::new(|| {
            self.pending_for_grouping.fetch_sub(1, Ordering::SeqCst);
            self.collect_group_by_tag_values();
        });
        if self.ctx.is_cancelled() {
            return;
        }

        let shard_id = scope.shard.id();
        let loader = self.ctx.track(TaskKind::DataLoad, Some(shard_id), || {
            let mut loader = SeriesResultLoader::new(scope.result_set.len());
            for (idx, result) in scope.result_set.iter().enumerate() {
                let family = self.tasks.data_load(
                    &self.ctx,
                    scope.shard.as_ref(),
                    self.flow.as_ref(),
                    result.as_ref(),
                    container,
                )?;
                if let Some(family) = family {
                    loader.set(idx, family);
                }
            }
            Ok(loader)
        });
        let loader = match loader {
            Ok(loader) => loader,
            Err(err) => {
                self.flow.complete(err);
                return;
            }
        };

        for low_series_id in container.iter() {
            let _ = loader.load(low_series_id);
        }
        trace!(shard_id, high_key = container.high_key(), series = container.len(), "container loaded");
    }

    fn build_group(self: &Arc<Self>, scope: &ShardScope, container: &SeriesContainer) {
        let _exit = OnExit::new(|| {
            if scope.group_wait.fetch_sub(1, Ordering::SeqCst) == 1 {
                if let Some(grouping) = &scope.grouping {
                    self.merge_group_by_tag_value_ids(grouping.tag_value_ids());
                }
            }
            self.pending_for_grouping.fetch_sub(1, Ordering::SeqCst);
            self.collect_group_by_tag_values();
        });
        if self.ctx.is_cancelled() {
            return;
        }

        let shard_id = scope.shard.id();
        match self.ctx.track(TaskKind::BuildGroup, Some(shard_id), || {
            self.tasks.build_group(
                &self.ctx,
                scope.shard.as_ref(),
                scope.grouping.as_deref(),
                container,
            )
        }) {
            Ok(groups) => {
                trace!(shard_id, high_key = container.high_key(), groups = groups.len(), "container grouped");
            }
            Err(err) => self.flow.complete(err),
        }
    }

    fn merge_group_by_tag_value_ids(&self, tag_value_ids: Vec<RoaringBitmap>) {
        let mut merged = self.tag_value_ids.lock();
        merge_tag_value_ids(&mut merged, tag_value_ids);
    }

    fn collect_group_by_tag_values(self: &Arc<Self>) {
        if self.pending_for_shard.load(Ordering::SeqCst) != 0
            || self.pending_for_grouping.load(Ordering::SeqCst) != 0
        {
            return;
        }
        if self
            .collecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let tag_value_ids = std::mem::take(&mut *self.tag_value_ids.lock());
        debug!(metric_id = self.plan.metric_id(), keys = tag_value_ids.len(), "collecting group by tag values");

        for (tag_index, (tag_key, ids)) in self
            .plan
            .group_by_tags()
            .iter()
            .zip(tag_value_ids)
            .enumerate()
        {
            if ids.is_empty() {
                self.flow.reduce_tag_values(tag_index, HashMap::new());
                continue;
            }
            let pipeline = Arc::clone(self);
            let tag_key = tag_key.clone();
            self.flow.load(Box::new(move || {
                pipeline.resolve_tag_values(tag_index, &tag_key, &ids)
            }));
        }
    }

    fn resolve_tag_values(&self, tag_index: usize, tag_key: &TagMeta, ids: &RoaringBitmap) {
        if self.ctx.is_cancelled() {
            return;
        }
        match self.ctx.track(TaskKind::CollectTagValues, None, || {
            self.tasks
                .collect_tag_values(&self.ctx, self.metadata.as_ref(), tag_key, ids)
        }) {
            Ok(tag_values) => self.flow.reduce_tag_values(tag_index, tag_values),
            Err(err) => self.flow.complete(err),
        }
    }
}

/// Map the "no data" sentinel to `None`
fn found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(QueryError::NotFound(what)) => {
            trace!(%what, "not found");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Runs the closure when dropped, on every exit path
struct OnExit<F: FnOnce()> {
    f: Option<F>,
}

impl<F: FnOnce()> OnExit<F> {
    fn new(f: F) -> Self {
        Self { f: Some(f) }
    }
}

impl<F: FnOnce()> Drop for OnExit<F> {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}
