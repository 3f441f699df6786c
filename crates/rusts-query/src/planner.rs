//! Storage execute plan: resolves a query's names against metadata

use crate::aggregation::{AggregateFunction, AggregatorSpec};
use crate::error::{QueryError, Result};
use crate::model::StorageQuery;
use crate::storage::Metadata;
use rusts_core::{FieldMeta, MetricId, TagMeta};
use serde::Serialize;
use std::collections::BTreeMap;

/// Resolved ids of one storage query. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct StorageExecutePlan {
    metric_id: MetricId,
    /// Per distinct field, ordered by field id
    specs: Vec<AggregatorSpec>,
    /// Group-by tag keys in query order
    group_by_tags: Vec<TagMeta>,
}

impl StorageExecutePlan {
    /// Resolve metric id, fields and group-by tag keys of `query`
    pub fn build(query: &StorageQuery, metadata: &dyn Metadata) -> Result<Self> {
        let metric_id = metadata.metric_id(&query.namespace, &query.metric_name)?;

        let mut specs: BTreeMap<u16, AggregatorSpec> = BTreeMap::new();
        for selection in &query.fields {
            let field = metadata.field(metric_id, &selection.field)?;
            let function = selection
                .function
                .unwrap_or_else(|| AggregateFunction::default_for(field.field_type));
            specs
                .entry(field.id)
                .or_insert_with(|| AggregatorSpec::new(field, query.interval))
                .add_function(function);
        }
        if specs.is_empty() {
            return Err(QueryError::InvalidQuery("no fields selected".to_string()));
        }

        let mut group_by_tags = Vec::with_capacity(query.group_by.len());
        for key in &query.group_by {
            if group_by_tags.iter().any(|t: &TagMeta| &t.key == key) {
                return Err(QueryError::InvalidQuery(format!("duplicate group by tag key: {}", key)));
            }
            let id = metadata.tag_key_id(metric_id, key)?;
            group_by_tags.push(TagMeta::new(key.clone(), id));
        }

        Ok(Self {
            metric_id,
            specs: specs.into_values().collect(),
            group_by_tags,
        })
    }

    pub fn metric_id(&self) -> MetricId {
        self.metric_id
    }

    /// Selected fields, ordered by field id
    pub fn fields(&self) -> Vec<FieldMeta> {
        self.specs.iter().map(|spec| spec.field.clone()).collect()
    }

    /// Downsampling/aggregation specs for the query flow
    pub fn aggregator_specs(&self) -> Vec<AggregatorSpec> {
        self.specs.clone()
    }

    /// Group-by tag keys in query order
    pub fn group_by_tags(&self) -> &[TagMeta] {
        &self.group_by_tags
    }
}
