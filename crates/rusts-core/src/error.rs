//! Error types for rusts-core

use thiserror::Error;

/// Core error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid time range: start {start} >= end {end}")]
    InvalidTimeRange { start: i64, end: i64 },

    #[error("Empty metric name")]
    EmptyMetricName,

    #[error("Empty namespace")]
    EmptyNamespace,

    #[error("Invalid interval: {0}")]
    InvalidInterval(i64),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
