//! RusTs Index - Series-id bitmaps and metadata dictionaries
//!
//! This crate provides:
//! - Container partitioning: splits a Roaring bitmap of series ids into
//!   independent 16-bit containers, the unit of concurrent grouping/loading
//! - Metadata index: metric, field, tag key and tag value dictionaries

pub mod container;
pub mod error;
pub mod metadata;

pub use container::{partition, SeriesContainer};
pub use error::{IndexError, Result};
pub use metadata::MetadataIndex;
