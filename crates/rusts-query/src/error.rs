//! Query error types

use thiserror::Error;

/// Input validation failures, checked before any stage work is scheduled
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("there is no shard id in search condition")]
    NoShardId,

    #[error("there is no shard in database storage engine")]
    NoShardInDatabase,

    #[error("storage's num. of shard not match search condition: database has {database}, requested {requested}")]
    ShardNotMatch { database: usize, requested: usize },

    #[error("shard not found in database storage engine")]
    ShardNotFound,

    #[error("got shard size not equals input shard size: found {found}, requested {requested}")]
    ShardNumNotMatch { found: usize, requested: usize },
}

/// Query errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// "No data" sentinel: swallowed at filtering and grouping boundaries
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Core(#[from] rusts_core::CoreError),
}

impl QueryError {
    /// Whether this is the "no data" sentinel
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryError::NotFound(_))
    }
}

/// Result type for query operations
pub type Result<T> = std::result::Result<T, QueryError>;

impl From<rusts_index::IndexError> for QueryError {
    fn from(e: rusts_index::IndexError) -> Self {
        if e.is_not_found() {
            QueryError::NotFound(e.to_string())
        } else {
            QueryError::Index(e.to_string())
        }
    }
}
