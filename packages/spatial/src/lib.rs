#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial joins for market data.
//!
//! Validates attribute records, joins them with administrative boundary
//! polygons on the canonical region key, and turns flow CSV rows into
//! origin/destination edges. Bad records are skipped and reported as
//! warnings; only malformed containers produce errors.

pub mod boundary;
pub mod flows;
pub mod merge;
pub mod parsing;
pub mod validate;

pub use boundary::{BoundaryRecord, BoundarySet};
pub use flows::{FlowFilter, FlowProcessor};
pub use merge::{GeoMerger, MergeFilter, MergeOptions, MergeOutcome};
pub use validate::{FeatureValidator, ValidationRules, validate_feature};

use thiserror::Error;

/// Errors that can occur during spatial processing.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// CSV reading failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON parsing failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input had the wrong container shape.
    #[error("Conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}
