//! Index error types

use rusts_core::{FieldType, MetricId, TagKeyId, TagValueId};
use thiserror::Error;

/// Index errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("Metric not found: {namespace}/{metric}")]
    MetricNotFound { namespace: String, metric: String },

    #[error("Field not found: {field} (metric {metric_id})")]
    FieldNotFound { metric_id: MetricId, field: String },

    #[error("Tag key not found: {key} (metric {metric_id})")]
    TagKeyNotFound { metric_id: MetricId, key: String },

    #[error("Tag value not found: {tag_value_id} (tag key {tag_key_id})")]
    TagValueNotFound {
        tag_key_id: TagKeyId,
        tag_value_id: TagValueId,
    },

    #[error("Field type mismatch for {field}: registered {registered}, got {actual}")]
    FieldTypeMismatch {
        field: String,
        registered: FieldType,
        actual: FieldType,
    },

    #[error("Too many fields for metric {0}")]
    TooManyFields(MetricId),
}

impl IndexError {
    /// Whether this error means the requested entry does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            IndexError::MetricNotFound { .. }
                | IndexError::FieldNotFound { .. }
                | IndexError::TagKeyNotFound { .. }
                | IndexError::TagValueNotFound { .. }
        )
    }
}

/// Result type for index operations
pub type Result<T> = std::result::Result<T, IndexError>;
