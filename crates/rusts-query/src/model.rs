//! Query model - the storage-level query a storage node executes

use crate::aggregation::AggregateFunction;
use crate::error::{QueryError, Result};
use rusts_core::{CoreError, TimeRange, Timestamp};
use serde::{Deserialize, Serialize};

/// Tag filter operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagFilter {
    /// Exact match: tag = value
    Equals { key: String, value: String },
    /// Not equal: tag != value
    NotEquals { key: String, value: String },
    /// Regex match: tag =~ /pattern/
    Regex { key: String, pattern: String },
    /// Any of values: tag IN (v1, v2, ...)
    In { key: String, values: Vec<String> },
    /// Tag exists
    Exists { key: String },
}

impl TagFilter {
    /// Tag key this filter applies to
    pub fn key(&self) -> &str {
        match self {
            TagFilter::Equals { key, .. }
            | TagFilter::NotEquals { key, .. }
            | TagFilter::Regex { key, .. }
            | TagFilter::In { key, .. }
            | TagFilter::Exists { key } => key,
        }
    }

    /// Build a predicate over the tag values of `key()`.
    /// The regex, if any, is compiled once here.
    pub fn value_matcher(&self) -> Result<Box<dyn Fn(&str) -> bool + Send + Sync>> {
        let matcher: Box<dyn Fn(&str) -> bool + Send + Sync> = match self {
            TagFilter::Equals { value, .. } => {
                let value = value.clone();
                Box::new(move |v: &str| v == value)
            }
            TagFilter::NotEquals { value, .. } => {
                let value = value.clone();
                Box::new(move |v: &str| v != value)
            }
            TagFilter::Regex { pattern, .. } => {
                let re = regex::Regex::new(pattern)
                    .map_err(|e| QueryError::InvalidQuery(format!("invalid regex '{}': {}", pattern, e)))?;
                Box::new(move |v: &str| re.is_match(v))
            }
            TagFilter::In { values, .. } => {
                let values = values.clone();
                Box::new(move |v: &str| values.iter().any(|candidate| candidate == v))
            }
            TagFilter::Exists { .. } => Box::new(|_: &str| true),
        };
        Ok(matcher)
    }
}

/// A selected field, optionally with an explicit aggregate function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelection {
    pub field: String,
    pub function: Option<AggregateFunction>,
}

/// Storage-level query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageQuery {
    /// Namespace the metric lives in
    pub namespace: String,
    /// Metric to query
    pub metric_name: String,
    /// Selected fields
    pub fields: Vec<FieldSelection>,
    /// Tag filters (AND); `None` means no condition
    pub condition: Option<Vec<TagFilter>>,
    /// Time range
    pub time_range: TimeRange,
    /// Downsampling interval (nanoseconds, 0 = raw)
    pub interval: i64,
    /// Group by tag keys
    pub group_by: Vec<String>,
    /// Collect per-task execution stats
    pub explain: bool,
}

impl StorageQuery {
    /// Create a new query builder
    pub fn builder(metric_name: impl Into<String>) -> StorageQueryBuilder {
        StorageQueryBuilder::new(metric_name)
    }

    /// Whether the query groups by tag keys
    pub fn has_group_by(&self) -> bool {
        !self.group_by.is_empty()
    }

    /// Tag filters, if the query has a non-empty condition
    pub fn condition(&self) -> Option<&[TagFilter]> {
        self.condition.as_deref().filter(|filters| !filters.is_empty())
    }

    /// Validate the query
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(CoreError::EmptyNamespace.into());
        }
        if self.metric_name.is_empty() {
            return Err(CoreError::EmptyMetricName.into());
        }
        if self.fields.is_empty() {
            return Err(QueryError::InvalidQuery("no fields selected".to_string()));
        }
        if self.interval < 0 {
            return Err(CoreError::InvalidInterval(self.interval).into());
        }
        self.time_range.validate()?;

        if let Some(filters) = self.condition() {
            for filter in filters {
                let _matcher = filter.value_matcher()?;
            }
        }
        Ok(())
    }
}

/// Query builder for fluent API
pub struct StorageQueryBuilder {
    namespace: String,
    metric_name: String,
    fields: Vec<FieldSelection>,
    condition: Vec<TagFilter>,
    time_range: TimeRange,
    interval: i64,
    group_by: Vec<String>,
    explain: bool,
}

impl StorageQueryBuilder {
    /// Create a new query builder
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            namespace: "default-ns".to_string(),
            metric_name: metric_name.into(),
            fields: Vec::new(),
            condition: Vec::new(),
            time_range: TimeRange::default(),
            interval: 0,
            group_by: Vec::new(),
            explain: false,
        }
    }

    /// Set namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Select a field, rolled up with its type's default function
    pub fn select(mut self, field: impl Into<String>) -> Self {
        self.fields.push(FieldSelection {
            field: field.into(),
            function: None,
        });
        self
    }

    /// Select a field with an explicit aggregate function
    pub fn select_aggregate(mut self, field: impl Into<String>, function: AggregateFunction) -> Self {
        self.fields.push(FieldSelection {
            field: field.into(),
            function: Some(function),
        });
        self
    }

    /// Set time range
    pub fn time_range(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.time_range = TimeRange::new(start, end);
        self
    }

    /// Set downsampling interval
    pub fn interval(mut self, interval_nanos: i64) -> Self {
        self.interval = interval_nanos;
        self
    }

    /// Add a tag filter to the condition
    pub fn filter(mut self, filter: TagFilter) -> Self {
        self.condition.push(filter);
        self
    }

    /// Add tag equals filter
    pub fn where_tag(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter(TagFilter::Equals {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Add tag in filter
    pub fn where_tag_in(self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.filter(TagFilter::In {
            key: key.into(),
            values,
        })
    }

    /// Group by tags
    pub fn group_by_tags(mut self, tags: Vec<String>) -> Self {
        self.group_by = tags;
        self
    }

    /// Collect execution stats
    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    /// Build and validate the query
    pub fn build(self) -> Result<StorageQuery> {
        let query = StorageQuery {
            namespace: self.namespace,
            metric_name: self.metric_name,
            fields: self.fields,
            condition: if self.condition.is_empty() {
                None
            } else {
                Some(self.condition)
            },
            time_range: self.time_range,
            interval: self.interval,
            group_by: self.group_by,
            explain: self.explain,
        };

        query.validate()?;
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let query = StorageQuery::builder("cpu")
            .namespace("ns")
            .select("usage")
            .select_aggregate("usage", AggregateFunction::Max)
            .time_range(0, 1000)
            .interval(10)
            .where_tag("host", "server01")
            .group_by_tags(vec!["region".to_string()])
            .build()
            .unwrap();

        assert_eq!(query.namespace, "ns");
        assert_eq!(query.fields.len(), 2);
        assert!(query.has_group_by());
        assert_eq!(query.condition().unwrap().len(), 1);
    }

    #[test]
    fn test_no_condition() {
        let query = StorageQuery::builder("cpu").select("usage").build().unwrap();
        assert!(query.condition().is_none());
        assert!(!query.has_group_by());
    }

    #[test]
    fn test_validation() {
        assert!(StorageQuery::builder("cpu").build().is_err());
        assert!(StorageQuery::builder("").select("usage").build().is_err());
        assert!(StorageQuery::builder("cpu")
            .select("usage")
            .time_range(100, 100)
            .build()
            .is_err());
        assert!(StorageQuery::builder("cpu")
            .select("usage")
            .interval(-1)
            .build()
            .is_err());

        let err = StorageQuery::builder("cpu")
            .select("usage")
            .filter(TagFilter::Regex {
                key: "host".to_string(),
                pattern: "(".to_string(),
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery(_)));
    }

    #[test]
    fn test_value_matcher() {
        let filter = TagFilter::In {
            key: "host".to_string(),
            values: vec!["a".to_string(), "b".to_string()],
        };
        let matcher = filter.value_matcher().unwrap();
        assert!(matcher("a"));
        assert!(!matcher("c"));
        assert_eq!(filter.key(), "host");

        let filter = TagFilter::Regex {
            key: "host".to_string(),
            pattern: "^web-[0-9]+$".to_string(),
        };
        let matcher = filter.value_matcher().unwrap();
        assert!(matcher("web-12"));
        assert!(!matcher("db-1"));

        let matcher = TagFilter::NotEquals {
            key: "env".to_string(),
            value: "prod".to_string(),
        }
        .value_matcher()
        .unwrap();
        assert!(matcher("staging"));
        assert!(!matcher("prod"));
    }
}
