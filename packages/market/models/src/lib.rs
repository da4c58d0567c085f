#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Market data types shared by the merge, flow, and session layers.
//!
//! Merged features serialize as standard `GeoJSON` so the output can be
//! handed straight to a map renderer. Geometry is reference-counted and
//! shared with the boundary dataset it came from.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Commodity assigned to placeholder features for regions without data.
pub const UNKNOWN_COMMODITY: &str = "unknown";

/// Numeric attribute fields carried by market observations.
pub const NUMERIC_FIELDS: &[&str] = &["price", "usd_price", "conflict_intensity", "residual"];

/// Property names written by the merger. Source properties with these
/// names are dropped from the pass-through bag so they are not emitted
/// twice.
pub const RESERVED_PROPERTIES: &[&str] = &[
    "region_id",
    "shape_name",
    "commodity",
    "date",
    "price",
    "usd_price",
    "conflict_intensity",
    "residual",
    "has_data",
];

/// `GeoJSON` `"type": "Feature"` tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    /// The only valid value.
    #[default]
    Feature,
}

/// `GeoJSON` `"type": "FeatureCollection"` tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionKind {
    /// The only valid value.
    #[default]
    FeatureCollection,
}

/// Numeric observations for one region/commodity/date.
///
/// Every field is optional; `None` serializes as `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketAttributes {
    /// Local-currency price.
    #[serde(default)]
    pub price: Option<f64>,
    /// Price converted to US dollars.
    #[serde(default)]
    pub usd_price: Option<f64>,
    /// Conflict intensity index.
    #[serde(default)]
    pub conflict_intensity: Option<f64>,
    /// Model residual (e.g. from the error-correction model).
    #[serde(default)]
    pub residual: Option<f64>,
}

impl MarketAttributes {
    /// Reads the numeric fields from a property map. Missing, null, and
    /// non-numeric values become `None`.
    #[must_use]
    pub fn from_properties(properties: &Map<String, Value>) -> Self {
        let read = |name: &str| {
            properties
                .get(name)
                .and_then(Value::as_f64)
                .filter(|v| v.is_finite())
        };
        Self {
            price: read("price"),
            usd_price: read("usd_price"),
            conflict_intensity: read("conflict_intensity"),
            residual: read("residual"),
        }
    }

    /// Returns `true` if no field holds a value.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.price.is_none()
            && self.usd_price.is_none()
            && self.conflict_intensity.is_none()
            && self.residual.is_none()
    }
}

/// Properties of a merged feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedProperties {
    /// Canonical region key.
    pub region_id: String,
    /// Raw boundary name, if the boundary provided one.
    #[serde(default)]
    pub shape_name: Option<String>,
    /// Commodity name, or [`UNKNOWN_COMMODITY`] for placeholders.
    pub commodity: String,
    /// Observation date.
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// Numeric observations.
    #[serde(flatten)]
    pub attributes: MarketAttributes,
    /// `false` for placeholder features emitted for regions without data.
    pub has_data: bool,
    /// Remaining boundary and attribute properties, passed through as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A boundary polygon joined with one attribute record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedFeature {
    /// Always `"Feature"`.
    #[serde(rename = "type")]
    pub kind: FeatureKind,
    /// `regionKey_commodity_date_index`, unique within one merge.
    pub id: String,
    /// Boundary geometry shared with the boundary dataset.
    pub geometry: Arc<geojson::Geometry>,
    /// Merged properties.
    pub properties: MergedProperties,
}

impl MergedFeature {
    /// Returns `true` if this is a placeholder for a region without data.
    #[must_use]
    pub const fn is_placeholder(&self) -> bool {
        !self.properties.has_data
    }
}

/// A `GeoJSON` `FeatureCollection` of merged features.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedCollection {
    /// Always `"FeatureCollection"`.
    #[serde(rename = "type")]
    pub kind: CollectionKind,
    /// Merged and placeholder features.
    pub features: Vec<MergedFeature>,
}

impl MergedCollection {
    /// Creates a collection from a list of features.
    #[must_use]
    pub fn new(features: Vec<MergedFeature>) -> Self {
        Self {
            kind: CollectionKind::FeatureCollection,
            features,
        }
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Returns `true` if the collection has no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Residual values of all non-placeholder features.
    #[must_use]
    pub fn residuals(&self) -> Vec<f64> {
        self.features
            .iter()
            .filter_map(|f| f.properties.attributes.residual)
            .collect()
    }
}

/// Result of validating one attribute feature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    /// `true` when `errors` is empty.
    pub is_valid: bool,
    /// Every rule the feature violated, in check order.
    pub errors: Vec<String>,
    /// Canonical region key, if one could be resolved.
    pub region_id: Option<String>,
}

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

/// A raw flow CSV row. Every column is optional; validation happens in
/// the flow processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFlowRow {
    /// Origin market or region name.
    #[serde(default)]
    pub source: Option<String>,
    /// Destination market or region name.
    #[serde(default)]
    pub target: Option<String>,
    /// Flow weight.
    #[serde(default)]
    pub flow_weight: Option<String>,
    /// Origin latitude.
    #[serde(default)]
    pub source_lat: Option<String>,
    /// Origin longitude.
    #[serde(default)]
    pub source_lng: Option<String>,
    /// Destination latitude.
    #[serde(default)]
    pub target_lat: Option<String>,
    /// Destination longitude.
    #[serde(default)]
    pub target_lng: Option<String>,
    /// Observation date.
    #[serde(default)]
    pub date: Option<String>,
    /// Commodity name.
    #[serde(default)]
    pub commodity: Option<String>,
}

/// One directed origin -> destination market relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEdge {
    /// Canonical origin region key.
    pub source: String,
    /// Canonical destination region key.
    pub target: String,
    /// Origin coordinates.
    pub source_coordinates: Coordinates,
    /// Destination coordinates.
    pub target_coordinates: Coordinates,
    /// Non-negative flow weight.
    pub flow_weight: f64,
    /// Observation date, if the row had a parseable one.
    pub date: Option<NaiveDate>,
    /// Commodity name, if the row had one.
    #[serde(default)]
    pub commodity: Option<String>,
}

/// Aggregated flows for one region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionFlowTotals {
    /// Canonical region key.
    pub region: String,
    /// Sum of weights of edges ending in the region.
    pub inflow: f64,
    /// Sum of weights of edges starting in the region.
    pub outflow: f64,
    /// Number of edges touching the region.
    pub edges: u64,
}
