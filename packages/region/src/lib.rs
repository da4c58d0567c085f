#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region name normalization and identifier resolution.
//!
//! Boundary files and analysis outputs spell administrative regions in
//! many different ways (`"Sana'a Governorate"`, `"San'a'"`, `"Ṣanʿāʾ"`).
//! This crate reduces every spelling to a canonical region key that both
//! datasets can be joined on. Alias tables are defined as TOML files
//! embedded at compile time.

pub mod aliases;
pub mod normalize;
pub mod resolve;

pub use aliases::{AliasTable, default_aliases};
pub use normalize::{normalize, normalize_value};
pub use resolve::RegionResolver;

use thiserror::Error;

/// Errors that can occur while building alias tables.
#[derive(Debug, Error)]
pub enum RegionError {
    /// TOML parsing failed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A spelling was claimed by two different canonical regions.
    #[error("Alias conflict: '{alias}' maps to both '{existing}' and '{requested}'")]
    Conflict {
        /// The normalized spelling.
        alias: String,
        /// Canonical key already registered for the spelling.
        existing: String,
        /// Canonical key that tried to claim it.
        requested: String,
    },

    /// A canonical name normalized to an empty key.
    #[error("Invalid canonical region name: {name:?}")]
    EmptyCanonical {
        /// The raw canonical name.
        name: String,
    },
}
