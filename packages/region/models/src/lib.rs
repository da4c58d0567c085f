#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region alias definition types.
//!
//! Defines the TOML schema for region alias tables and the strategies used
//! to pick a region identifier out of a feature's properties.

use serde::{Deserialize, Serialize};

/// A region alias table, deserialized from TOML.
///
/// ```toml
/// id = "yemen_admin1"
///
/// [[regions]]
/// canonical = "sanaa"
/// variants = ["San'a'", "Sana'a Governorate", "Sana"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasDefinition {
    /// Unique table identifier (e.g., `"yemen_admin1"`).
    pub id: String,
    /// Alias groups, one per canonical region.
    #[serde(default)]
    pub regions: Vec<AliasGroup>,
}

/// All known spellings of one administrative region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasGroup {
    /// The canonical region key every variant resolves to.
    pub canonical: String,
    /// Alternate spellings. May be written in any case or with diacritics;
    /// they are normalized when the table is built.
    #[serde(default)]
    pub variants: Vec<String>,
}

/// A single way of reading a region identifier from feature properties.
///
/// Strategies are evaluated in order and the first one that yields a
/// non-empty key wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionStrategy {
    /// The pre-computed `region_id` property.
    RegionId,
    /// The `admin1` property used by the analysis pipeline outputs.
    Admin1,
    /// The `shapeName` property used by geoBoundaries files.
    ShapeName,
    /// The `ADM1_EN` property used by OCHA boundary files.
    Adm1En,
}

impl RegionStrategy {
    /// Default resolution order.
    pub const DEFAULT_ORDER: &[Self] = &[Self::RegionId, Self::Admin1, Self::ShapeName, Self::Adm1En];

    /// The property name this strategy reads.
    #[must_use]
    pub const fn property(self) -> &'static str {
        match self {
            Self::RegionId => "region_id",
            Self::Admin1 => "admin1",
            Self::ShapeName => "shapeName",
            Self::Adm1En => "ADM1_EN",
        }
    }
}

impl std::fmt::Display for RegionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.property())
    }
}
