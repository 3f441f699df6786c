//! Metadata Index - metric, field, tag key and tag value dictionaries
//!
//! Assigns dense ids to metrics, fields, tag keys and tag values and resolves
//! them back. Tag value ids are what group-by bitmaps carry until the final
//! collection step turns them into strings.

use crate::error::{IndexError, Result};
use dashmap::DashMap;
use roaring::RoaringBitmap;
use rusts_core::{FieldId, FieldMeta, FieldType, MetricId, TagKeyId, TagValueId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::trace;

/// (namespace, metric name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricKey {
    namespace: String,
    name: String,
}

/// String <-> id dictionary of one tag key
#[derive(Debug, Default)]
struct TagValueDict {
    ids: HashMap<String, TagValueId>,
    values: Vec<String>,
}

/// Metadata index using DashMap for concurrent access
pub struct MetadataIndex {
    /// (namespace, metric) -> metric id
    metrics: DashMap<MetricKey, MetricId>,
    /// Metric id -> fields, indexed by field id
    fields: DashMap<MetricId, Vec<FieldMeta>>,
    /// (metric id, tag key) -> tag key id
    tag_keys: DashMap<(MetricId, String), TagKeyId>,
    /// Tag key id -> value dictionary
    tag_values: DashMap<TagKeyId, TagValueDict>,
    next_metric_id: AtomicU32,
    next_tag_key_id: AtomicU32,
}

impl MetadataIndex {
    /// Create a new metadata index
    pub fn new() -> Self {
        Self {
            metrics: DashMap::new(),
            fields: DashMap::new(),
            tag_keys: DashMap::new(),
            tag_values: DashMap::new(),
            next_metric_id: AtomicU32::new(1),
            next_tag_key_id: AtomicU32::new(1),
        }
    }

    /// Get or assign the id of a metric
    pub fn register_metric(&self, namespace: &str, name: &str) -> MetricId {
        let key = MetricKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        *self.metrics.entry(key).or_insert_with(|| {
            let id = self.next_metric_id.fetch_add(1, Ordering::Relaxed);
            trace!(namespace, metric = name, metric_id = id, "registered metric");
            id
        })
    }

    /// Get or assign a field of a metric. Re-registering with another type fails.
    pub fn register_field(
        &self,
        metric_id: MetricId,
        name: &str,
        field_type: FieldType,
    ) -> Result<FieldMeta> {
        let mut fields = self.fields.entry(metric_id).or_default();

        if let Some(existing) = fields.iter().find(|f| f.name == name) {
            if existing.field_type != field_type {
                return Err(IndexError::FieldTypeMismatch {
                    field: name.to_string(),
                    registered: existing.field_type,
                    actual: field_type,
                });
            }
            return Ok(existing.clone());
        }

        let id = FieldId::try_from(fields.len()).map_err(|_| IndexError::TooManyFields(metric_id))?;
        let meta = FieldMeta::new(id, name, field_type);
        fields.push(meta.clone());
        Ok(meta)
    }

    /// Get or assign the id of a tag key of a metric
    pub fn register_tag_key(&self, metric_id: MetricId, key: &str) -> TagKeyId {
        *self
            .tag_keys
            .entry((metric_id, key.to_string()))
            .or_insert_with(|| self.next_tag_key_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Get or assign the id of a tag value
    pub fn register_tag_value(&self, tag_key_id: TagKeyId, value: &str) -> TagValueId {
        let mut dict = self.tag_values.entry(tag_key_id).or_default();
        if let Some(&id) = dict.ids.get(value) {
            return id;
        }
        let id = dict.values.len() as TagValueId;
        dict.values.push(value.to_string());
        dict.ids.insert(value.to_string(), id);
        id
    }

    /// Resolve a metric id
    pub fn metric_id(&self, namespace: &str, name: &str) -> Result<MetricId> {
        let key = MetricKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.metrics
            .get(&key)
            .map(|id| *id)
            .ok_or_else(|| IndexError::MetricNotFound {
                namespace: namespace.to_string(),
                metric: name.to_string(),
            })
    }

    /// Resolve a field of a metric
    pub fn field(&self, metric_id: MetricId, name: &str) -> Result<FieldMeta> {
        self.fields
            .get(&metric_id)
            .and_then(|fields| fields.iter().find(|f| f.name == name).cloned())
            .ok_or_else(|| IndexError::FieldNotFound {
                metric_id,
                field: name.to_string(),
            })
    }

    /// Resolve a tag key id
    pub fn tag_key_id(&self, metric_id: MetricId, key: &str) -> Result<TagKeyId> {
        self.tag_keys
            .get(&(metric_id, key.to_string()))
            .map(|id| *id)
            .ok_or_else(|| IndexError::TagKeyNotFound {
                metric_id,
                key: key.to_string(),
            })
    }

    /// Ids of the values of a tag key accepted by `predicate`.
    /// An unknown tag key yields an empty bitmap.
    pub fn find_tag_value_ids(
        &self,
        tag_key_id: TagKeyId,
        predicate: &dyn Fn(&str) -> bool,
    ) -> RoaringBitmap {
        let mut result = RoaringBitmap::new();
        if let Some(dict) = self.tag_values.get(&tag_key_id) {
            for (id, value) in dict.values.iter().enumerate() {
                if predicate(value) {
                    result.insert(id as TagValueId);
                }
            }
        }
        result
    }

    /// Resolve tag value ids to their strings
    pub fn tag_values(
        &self,
        tag_key_id: TagKeyId,
        tag_value_ids: &RoaringBitmap,
    ) -> Result<HashMap<TagValueId, String>> {
        let mut result = HashMap::with_capacity(tag_value_ids.len() as usize);
        if tag_value_ids.is_empty() {
            return Ok(result);
        }

        let dict = self.tag_values.get(&tag_key_id);
        for id in tag_value_ids.iter() {
            let value = dict
                .as_ref()
                .and_then(|d| d.values.get(id as usize))
                .ok_or(IndexError::TagValueNotFound {
                    tag_key_id,
                    tag_value_id: id,
                })?;
            result.insert(id, value.clone());
        }
        Ok(result)
    }

    /// Number of registered metrics
    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }
}

impl Default for MetadataIndex {
    fn default() -> Self {
        Self::new()
    }
}
