//! Downsampling aggregation specs handed to the query flow

use crate::error::{QueryError, Result};
use rusts_core::{FieldMeta, FieldType};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported aggregation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// Count of values
    Count,
    /// Sum of values
    Sum,
    /// Mean (average) of values
    Mean,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// First value (by time)
    First,
    /// Last value (by time)
    Last,
}

impl AggregateFunction {
    /// Function used to roll up a field when the query does not name one
    pub fn default_for(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Sum => AggregateFunction::Sum,
            FieldType::Min => AggregateFunction::Min,
            FieldType::Max => AggregateFunction::Max,
            FieldType::Last => AggregateFunction::Last,
            FieldType::First => AggregateFunction::First,
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "count" => Ok(AggregateFunction::Count),
            "sum" => Ok(AggregateFunction::Sum),
            "mean" | "avg" | "average" => Ok(AggregateFunction::Mean),
            "min" => Ok(AggregateFunction::Min),
            "max" => Ok(AggregateFunction::Max),
            "first" => Ok(AggregateFunction::First),
            "last" => Ok(AggregateFunction::Last),
            _ => Err(QueryError::InvalidQuery(format!("unknown aggregate function: {}", s))),
        }
    }
}

/// Downsampling/aggregation spec of one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorSpec {
    /// Resolved field
    pub field: FieldMeta,
    /// Functions to compute, deduplicated, in first-requested order
    pub functions: Vec<AggregateFunction>,
    /// Downsampling interval in nanoseconds (0 = raw)
    pub interval: i64,
}

impl AggregatorSpec {
    /// Create an empty spec for a field
    pub fn new(field: FieldMeta, interval: i64) -> Self {
        Self {
            field,
            functions: Vec::new(),
            interval,
        }
    }

    /// Add a function if not yet present
    pub fn add_function(&mut self, function: AggregateFunction) {
        if !self.functions.contains(&function) {
            self.functions.push(function);
        }
    }
}
