//! Core data types for the RusTs storage query engine

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nanosecond-precision Unix epoch timestamp
pub type Timestamp = i64;

/// Identifier of a shard within one database on a storage node
pub type ShardId = u32;

/// Dense identifier of a time series within a shard.
///
/// The high 16 bits select a bitmap container, the low 16 bits are the
/// offset inside that container.
pub type SeriesId = u32;

/// Identifier of a metric within a namespace
pub type MetricId = u32;

/// Identifier of a field within a metric
pub type FieldId = u16;

/// Identifier of a tag key within a metric
pub type TagKeyId = u32;

/// Dense identifier of a tag value within a tag key
pub type TagValueId = u32;

/// Field type, which decides how raw points are rolled up when downsampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Counter-like field, rolled up by summing
    Sum,
    /// Keeps the minimum value per interval
    Min,
    /// Keeps the maximum value per interval
    Max,
    /// Gauge-like field, keeps the last value per interval
    Last,
    /// Keeps the first value per interval
    First,
}

impl FieldType {
    /// Get the type name of this field type
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::Sum => "sum",
            FieldType::Min => "min",
            FieldType::Max => "max",
            FieldType::Last => "last",
            FieldType::First => "first",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Resolved field metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldMeta {
    pub id: FieldId,
    pub name: String,
    pub field_type: FieldType,
}

impl FieldMeta {
    /// Create new field metadata
    pub fn new(id: FieldId, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            id,
            name: name.into(),
            field_type,
        }
    }
}

/// A tag key with its resolved id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagMeta {
    pub key: String,
    pub id: TagKeyId,
}

impl TagMeta {
    /// Create a new tag meta
    pub fn new(key: impl Into<String>, id: TagKeyId) -> Self {
        Self { key: key.into(), id }
    }
}

/// Time range for queries (start inclusive, end exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check that the range is not empty
    pub fn validate(&self) -> Result<()> {
        if self.start >= self.end {
            return Err(CoreError::InvalidTimeRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }
}
