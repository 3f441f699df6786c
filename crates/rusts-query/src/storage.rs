//! Storage engine collaborators consumed by the executor
//!
//! The executor only needs shard lookup and metadata resolution from the
//! storage engine; how shards persist data is not its concern.

use crate::error::Result;
use roaring::RoaringBitmap;
use rusts_core::{FieldMeta, MetricId, ShardId, TagKeyId, TagValueId};
use rusts_index::MetadataIndex;
use std::collections::HashMap;
use std::sync::Arc;

/// One database on a storage node
pub trait Database: Send + Sync {
    /// Look up a shard hosted by this node
    fn get_shard(&self, shard_id: ShardId) -> Option<Arc<dyn Shard>>;

    /// Number of shards this node hosts for the database
    fn num_of_shards(&self) -> usize;

    /// Metric/tag metadata of the database
    fn metadata(&self) -> Arc<dyn Metadata>;
}

/// Opaque shard handle passed to storage tasks
pub trait Shard: Send + Sync {
    fn id(&self) -> ShardId;
}

/// Metric, field and tag metadata lookups.
/// Missing entries are reported as `QueryError::NotFound`.
pub trait Metadata: Send + Sync {
    fn metric_id(&self, namespace: &str, metric_name: &str) -> Result<MetricId>;

    fn field(&self, metric_id: MetricId, field_name: &str) -> Result<FieldMeta>;

    fn tag_key_id(&self, metric_id: MetricId, tag_key: &str) -> Result<TagKeyId>;

    /// Ids of the values of a tag key accepted by `predicate`
    fn find_tag_value_ids(
        &self,
        tag_key_id: TagKeyId,
        predicate: &dyn Fn(&str) -> bool,
    ) -> Result<RoaringBitmap>;

    /// Resolve tag value ids to strings
    fn tag_values(
        &self,
        tag_key_id: TagKeyId,
        tag_value_ids: &RoaringBitmap,
    ) -> Result<HashMap<TagValueId, String>>;
}

impl Metadata for MetadataIndex {
    fn metric_id(&self, namespace: &str, metric_name: &str) -> Result<MetricId> {
        Ok(MetadataIndex::metric_id(self, namespace, metric_name)?)
    }

    fn field(&self, metric_id: MetricId, field_name: &str) -> Result<FieldMeta> {
        Ok(MetadataIndex::field(self, metric_id, field_name)?)
    }

    fn tag_key_id(&self, metric_id: MetricId, tag_key: &str) -> Result<TagKeyId> {
        Ok(MetadataIndex::tag_key_id(self, metric_id, tag_key)?)
    }

    fn find_tag_value_ids(
        &self,
        tag_key_id: TagKeyId,
        predicate: &dyn Fn(&str) -> bool,
    ) -> Result<RoaringBitmap> {
        Ok(MetadataIndex::find_tag_value_ids(self, tag_key_id, predicate))
    }

    fn tag_values(
        &self,
        tag_key_id: TagKeyId,
        tag_value_ids: &RoaringBitmap,
    ) -> Result<HashMap<TagValueId, String>> {
        Ok(MetadataIndex::tag_values(self, tag_key_id, tag_value_ids)?)
    }
}
