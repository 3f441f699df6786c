//! Storage tasks: the units of filtering, grouping and loading work
//!
//! Every task either succeeds, reports `QueryError::NotFound` ("no data") or
//! fails. Concrete series search and data filtering live in the storage
//! engine and are injected through [`StorageTasks`]; the remaining tasks have
//! default implementations over the collaborator traits below, which callers
//! may override.

use crate::context::StorageExecuteContext;
use crate::error::{QueryError, Result};
use crate::flow::QueryFlow;
use crate::planner::StorageExecutePlan;
use crate::storage::{Metadata, Shard};
use roaring::RoaringBitmap;
use rusts_core::{TagKeyId, TagMeta, TagValueId};
use rusts_index::SeriesContainer;
use std::collections::HashMap;
use std::sync::Arc;

/// Tag value id combination -> low series ids of one container
pub type GroupedSeries = HashMap<Vec<TagValueId>, Vec<u16>>;

/// Tag value ids matched by the query condition, per filtered tag key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagSearchResult {
    pub tag_value_ids: HashMap<TagKeyId, RoaringBitmap>,
}

/// Loads raw field data of one container from one data family
pub trait DataLoader: Send + Sync {
    /// Raw blocks of the series at `low_series_id`
    fn load(&self, low_series_id: u16) -> Vec<Vec<u8>>;
}

/// Outcome of filtering one data family (memory database or file family)
pub trait FilterResult: Send + Sync {
    /// Series ids with data in this family
    fn series_ids(&self) -> &RoaringBitmap;

    /// Loader for the series of one container, `None` if the family has no
    /// data for it
    fn load(&self, container: &SeriesContainer) -> Option<Box<dyn DataLoader>>;
}

/// Ordered filter outcomes of one shard. Empty means no data.
#[derive(Default, Clone)]
pub struct FilterResultSet {
    results: Vec<Arc<dyn FilterResult>>,
}

impl FilterResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = Arc<dyn FilterResult>>) {
        self.results.extend(results);
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn FilterResult>> {
        self.results.iter()
    }

    /// Union of the series ids of every family
    pub fn series_ids(&self) -> RoaringBitmap {
        let mut series_ids = RoaringBitmap::new();
        for result in &self.results {
            series_ids |= result.series_ids();
        }
        series_ids
    }
}

/// Group-by resolution of one shard
pub trait GroupingContext: Send + Sync {
    /// Group the series of one container by their tag value ids
    fn build_group(&self, container: &SeriesContainer) -> GroupedSeries;

    /// Tag value ids seen so far, one bitmap per group-by key
    fn tag_value_ids(&self) -> Vec<RoaringBitmap>;
}

/// Merged loader over every family of one container
pub struct SeriesResultLoader {
    loaders: Vec<Option<Box<dyn DataLoader>>>,
}

impl SeriesResultLoader {
    /// Loader with `len` empty family slots
    pub fn new(len: usize) -> Self {
        Self {
            loaders: (0..len).map(|_| None).collect(),
        }
    }

    /// Set the loader of family `idx`; out of range indexes are ignored
    pub fn set(&mut self, idx: usize, loader: Box<dyn DataLoader>) {
        if let Some(slot) = self.loaders.get_mut(idx) {
            *slot = Some(loader);
        }
    }

    /// Concatenated blocks of every family, in family order
    pub fn load(&self, low_series_id: u16) -> Vec<Vec<u8>> {
        let mut blocks = Vec::new();
        for loader in self.loaders.iter().flatten() {
            blocks.extend(loader.load(low_series_id));
        }
        blocks
    }
}

/// Task factory injected into the executor
pub trait StorageTasks: Send + Sync {
    /// Candidate series ids of a shard, narrowed by the tag search result
    fn series_search(
        &self,
        ctx: &StorageExecuteContext,
        shard: &dyn Shard,
        plan: &StorageExecutePlan,
        tag_search: Option<&TagSearchResult>,
    ) -> Result<RoaringBitmap>;

    /// Filter the in-memory database of a shard
    fn memory_filter(
        &self,
        ctx: &StorageExecuteContext,
        shard: &dyn Shard,
        plan: &StorageExecutePlan,
        series_ids: &RoaringBitmap,
    ) -> Result<Vec<Arc<dyn FilterResult>>>;

    /// Filter the persisted data families of a shard
    fn file_filter(
        &self,
        ctx: &StorageExecuteContext,
        shard: &dyn Shard,
        plan: &StorageExecutePlan,
        series_ids: &RoaringBitmap,
    ) -> Result<Vec<Arc<dyn FilterResult>>>;

    /// Resolve the group-by context of a shard
    fn grouping_context(
        &self,
        ctx: &StorageExecuteContext,
        shard: &dyn Shard,
        tag_key_ids: &[TagKeyId],
        series_ids: &RoaringBitmap,
    ) -> Result<Arc<dyn GroupingContext>>;

    /// Resolve the query against metadata
    fn build_plan(
        &self,
        ctx: &StorageExecuteContext,
        metadata: &dyn Metadata,
    ) -> Result<StorageExecutePlan> {
        StorageExecutePlan::build(ctx.query(), metadata)
    }

    /// Resolve the tag value ids matched by the query condition. A filter
    /// that matches nothing makes the whole condition not found.
    fn tag_search(
        &self,
        ctx: &StorageExecuteContext,
        plan: &StorageExecutePlan,
        metadata: &dyn Metadata,
    ) -> Result<TagSearchResult> {
        let mut result = TagSearchResult::default();
        let Some(filters) = ctx.query().condition() else {
            return Ok(result);
        };

        for filter in filters {
            let tag_key_id = metadata.tag_key_id(plan.metric_id(), filter.key())?;
            let matcher = filter.value_matcher()?;
            let ids = metadata.find_tag_value_ids(tag_key_id, matcher.as_ref())?;

            let merged = match result.tag_value_ids.remove(&tag_key_id) {
                Some(existing) => existing & ids,
                None => ids,
            };
            if merged.is_empty() {
                return Err(QueryError::NotFound(format!(
                    "no tag value matches filter on {}",
                    filter.key()
                )));
            }
            result.tag_value_ids.insert(tag_key_id, merged);
        }
        Ok(result)
    }

    /// Group the series of one container. Without a grouping context all
    /// series fall into a single group with no tag values.
    fn build_group(
        &self,
        _ctx: &StorageExecuteContext,
        _shard: &dyn Shard,
        grouping: Option<&dyn GroupingContext>,
        container: &SeriesContainer,
    ) -> Result<GroupedSeries> {
        Ok(match grouping {
            Some(grouping) => grouping.build_group(container),
            None => HashMap::from([(Vec::new(), container.low_ids().to_vec())]),
        })
    }

    /// Data loader of one family for one container
    fn data_load(
        &self,
        _ctx: &StorageExecuteContext,
        _shard: &dyn Shard,
        _flow: &dyn QueryFlow,
        result: &dyn FilterResult,
        container: &SeriesContainer,
    ) -> Result<Option<Box<dyn DataLoader>>> {
        Ok(result.load(container))
    }

    /// Resolve collected tag value ids to strings
    fn collect_tag_values(
        &self,
        _ctx: &StorageExecuteContext,
        metadata: &dyn Metadata,
        tag_key: &TagMeta,
        tag_value_ids: &RoaringBitmap,
    ) -> Result<HashMap<TagValueId, String>> {
        metadata.tag_values(tag_key.id, tag_value_ids)
    }
}
