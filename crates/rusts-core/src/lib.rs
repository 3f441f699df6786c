//! RusTs Core - Core types for the storage query engine
//!
//! This crate provides the fundamental types shared by the index and query crates:
//! - Dense identifiers: `ShardId`, `SeriesId`, `MetricId`, `FieldId`, `TagKeyId`, `TagValueId`
//! - `FieldType` / `FieldMeta`: resolved field metadata
//! - `TagMeta`: a group-by or filter tag key with its resolved id
//! - `TimeRange`: half-open query time range
//! - `ParallelConfig`: thread sizing for the query stages

pub mod error;
pub mod parallel;
pub mod types;

pub use error::{CoreError, Result};
pub use parallel::ParallelConfig;
pub use types::*;
