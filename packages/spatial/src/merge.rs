//! Boundary/attribute merging.
//!
//! Joins validated attribute records with boundary polygons on the
//! canonical region key. Every boundary region appears in the output:
//! regions without any matching record get a single placeholder feature
//! so the map can still draw them as "no data".

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use market_map_market_models::{
    FeatureKind, MarketAttributes, MergedCollection, MergedFeature, MergedProperties,
    RESERVED_PROPERTIES, UNKNOWN_COMMODITY,
};
use market_map_region::{AliasTable, RegionResolver};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::boundary::{BoundaryRecord, BoundarySet};
use crate::parsing::{format_date, parse_date_value};
use crate::validate::{FeatureValidator, ValidationRules};

/// Restricts which attribute records take part in a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeFilter {
    /// Only records for this commodity (case-insensitive).
    pub commodity: Option<String>,
    /// Only records for this date.
    pub date: Option<NaiveDate>,
}

impl MergeFilter {
    fn matches(&self, commodity: &str, date: NaiveDate) -> bool {
        self.commodity
            .as_deref()
            .is_none_or(|c| c.trim().eq_ignore_ascii_case(commodity))
            && self.date.is_none_or(|d| d == date)
    }
}

/// Merge behaviour toggles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Keep only the first record per region/commodity/date.
    pub dedupe: bool,
    /// Reject records whose commodity differs from this one.
    pub expected_commodity: Option<String>,
    /// Optional validation rules.
    pub rules: ValidationRules,
    /// Record filter.
    pub filter: MergeFilter,
}

/// The merged collection plus diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Merged and placeholder features.
    pub collection: MergedCollection,
    /// Attribute region keys that had no boundary.
    pub unmatched_regions: BTreeSet<String>,
    /// One message per skipped record.
    pub warnings: Vec<String>,
    /// Number of records skipped as invalid or duplicate.
    pub skipped: usize,
}

/// Joins attribute records with a [`BoundarySet`].
#[derive(Debug, Clone)]
pub struct GeoMerger<'a> {
    aliases: &'a AliasTable,
    resolver: RegionResolver,
    options: MergeOptions,
}

impl<'a> GeoMerger<'a> {
    /// Creates a merger with the default resolver and options.
    #[must_use]
    pub fn new(aliases: &'a AliasTable) -> Self {
        Self {
            aliases,
            resolver: RegionResolver::default(),
            options: MergeOptions::default(),
        }
    }

    /// Replaces the merge options.
    #[must_use]
    pub fn with_options(mut self, options: MergeOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the region resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: RegionResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Merges raw boundary and attribute JSON.
    ///
    /// `attributes` may be a `FeatureCollection` or an array of features or
    /// flat records. If either side has no features, an empty collection is
    /// returned and the problem is logged.
    #[must_use]
    pub fn merge_values(
        &self,
        boundaries: &Value,
        attributes: &Value,
        excluded: &BTreeSet<String>,
    ) -> MergeOutcome {
        let boundaries = BoundarySet::from_geojson(boundaries, self.aliases, excluded);
        let Some(attributes) = attribute_features(attributes) else {
            log::error!("Attribute data is neither a FeatureCollection nor an array");
            return MergeOutcome::default();
        };
        self.merge(&boundaries, &attributes)
    }

    /// Merges attribute features with an already-built boundary set.
    #[must_use]
    pub fn merge(&self, boundaries: &BoundarySet, attributes: &[Value]) -> MergeOutcome {
        if boundaries.is_empty() {
            log::error!("No boundary features to merge");
            return MergeOutcome::default();
        }
        if attributes.is_empty() {
            log::error!("No attribute features to merge");
            return MergeOutcome::default();
        }

        let validator =
            FeatureValidator::new(&self.resolver, self.aliases).with_rules(self.options.rules);
        let expected = self.options.expected_commodity.as_deref();

        let mut outcome = MergeOutcome::default();
        let mut features = Vec::new();
        let mut matched: BTreeMap<&str, usize> = BTreeMap::new();
        let mut seen: BTreeSet<(String, String, NaiveDate)> = BTreeSet::new();

        for (index, feature) in attributes.iter().enumerate() {
            let validation = validator.validate(feature, expected);
            if !validation.is_valid {
                let message = format!("Record {index}: {}", validation.errors.join("; "));
                log::debug!("Skipping invalid attribute record: {message}");
                outcome.warnings.push(message);
                outcome.skipped += 1;
                continue;
            }

            let (Some(props), Some(region_key)) = (
                feature.get("properties").and_then(Value::as_object),
                validation.region_id,
            ) else {
                continue;
            };
            let commodity = props
                .get("commodity")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            let Some(date) = props.get("date").and_then(parse_date_value) else {
                continue;
            };

            if !self.options.filter.matches(commodity, date) {
                continue;
            }

            let Some(boundary) = boundaries.get(&region_key) else {
                outcome.unmatched_regions.insert(region_key);
                continue;
            };

            if self.options.dedupe
                && !seen.insert((region_key.clone(), commodity.to_lowercase(), date))
            {
                let message = format!(
                    "Record {index}: duplicate of {region_key}/{commodity}/{} dropped",
                    format_date(date)
                );
                log::debug!("{message}");
                outcome.warnings.push(message);
                outcome.skipped += 1;
                continue;
            }

            features.push(merged_feature(boundary, props, &region_key, commodity, date, index));
            *matched.entry(boundary.region_key.as_str()).or_default() += 1;
        }

        let mut placeholders = 0;
        for boundary in boundaries.records() {
            if !matched.contains_key(boundary.region_key.as_str()) {
                features.push(placeholder_feature(boundary));
                placeholders += 1;
            }
        }

        if !outcome.unmatched_regions.is_empty() {
            log::warn!(
                "{} attribute regions have no boundary: {}",
                outcome.unmatched_regions.len(),
                outcome
                    .unmatched_regions
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        if outcome.skipped > 0 {
            log::warn!("Skipped {} of {} attribute records", outcome.skipped, attributes.len());
        }
        log::info!(
            "Merged {} features ({placeholders} placeholders) from {} records",
            features.len(),
            attributes.len()
        );

        outcome.collection = MergedCollection::new(features);
        outcome
    }
}

/// Extracts attribute features from a `FeatureCollection` or an array.
///
/// Array elements without a `properties` object are treated as flat
/// records and wrapped as `{ "properties": record, "geometry": record.geometry }`.
/// Returns `None` for any other shape.
#[must_use]
pub fn attribute_features(value: &Value) -> Option<Vec<Value>> {
    if let Some(features) = value.get("features").and_then(Value::as_array) {
        return Some(features.clone());
    }

    let records = value.as_array()?;
    Some(
        records
            .iter()
            .map(|record| match record.as_object() {
                Some(obj) if !obj.get("properties").is_some_and(Value::is_object) => {
                    let mut properties = obj.clone();
                    let geometry = properties.remove("geometry").unwrap_or(Value::Null);
                    serde_json::json!({
                        "type": "Feature",
                        "properties": properties,
                        "geometry": geometry,
                    })
                }
                _ => record.clone(),
            })
            .collect(),
    )
}

/// Copies properties that the merger does not write itself.
fn passthrough(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        if !RESERVED_PROPERTIES.contains(&key.as_str()) {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn merged_feature(
    boundary: &BoundaryRecord,
    props: &Map<String, Value>,
    region_key: &str,
    commodity: &str,
    date: NaiveDate,
    index: usize,
) -> MergedFeature {
    let mut extra = Map::new();
    passthrough(&mut extra, &boundary.properties);
    passthrough(&mut extra, props);

    MergedFeature {
        kind: FeatureKind::Feature,
        id: format!("{region_key}_{commodity}_{}_{index}", format_date(date)),
        geometry: boundary.geometry.clone(),
        properties: MergedProperties {
            region_id: region_key.to_string(),
            shape_name: Some(boundary.shape_name.clone()),
            commodity: commodity.to_string(),
            date: Some(date),
            attributes: MarketAttributes::from_properties(props),
            has_data: true,
            extra,
        },
    }
}

fn placeholder_feature(boundary: &BoundaryRecord) -> MergedFeature {
    let mut extra = Map::new();
    passthrough(&mut extra, &boundary.properties);

    MergedFeature {
        kind: FeatureKind::Feature,
        id: format!("{}_{UNKNOWN_COMMODITY}_nodata", boundary.region_key),
        geometry: boundary.geometry.clone(),
        properties: MergedProperties {
            region_id: boundary.region_key.clone(),
            shape_name: Some(boundary.shape_name.clone()),
            commodity: UNKNOWN_COMMODITY.to_string(),
            date: None,
            attributes: MarketAttributes::default(),
            has_data: false,
            extra,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use market_map_region::default_aliases;
    use serde_json::json;

    fn boundary(name: &str, x: f64) -> Value {
        json!({
            "type": "Feature",
            "properties": { "shapeName": name, "shapeGroup": "YEM" },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[x, 15.0], [x + 1.0, 15.0], [x + 1.0, 16.0], [x, 15.0]]],
            },
        })
    }

    fn record(region: &str, commodity: &str, date: &str, price: f64) -> Value {
        json!({
            "type": "Feature",
            "properties": {
                "admin1": region,
                "commodity": commodity,
                "date": date,
                "price": price,
                "market": format!("{region} market"),
            },
            "geometry": { "type": "Point", "coordinates": [44.0, 15.0] },
        })
    }

    fn boundaries() -> Value {
        json!({
            "type": "FeatureCollection",
            "features": [boundary("Sanaa", 44.0), boundary("Aden", 45.0)],
        })
    }

    fn merge(attributes: &Value) -> MergeOutcome {
        GeoMerger::new(default_aliases()).merge_values(&boundaries(), attributes, &BTreeSet::new())
    }

    fn by_region<'o>(outcome: &'o MergeOutcome, key: &str) -> Vec<&'o MergedFeature> {
        outcome
            .collection
            .features
            .iter()
            .filter(|f| f.properties.region_id == key)
            .collect()
    }

    #[test]
    fn merges_alias_and_emits_placeholder() {
        let outcome = merge(&json!([record("Sana'a", "Wheat", "2023-01-01", 100.0)]));

        assert_eq!(outcome.collection.len(), 2);

        let sanaa = by_region(&outcome, "sanaa");
        assert_eq!(sanaa.len(), 1);
        assert_eq!(sanaa[0].properties.attributes.price, Some(100.0));
        assert_eq!(sanaa[0].id, "sanaa_Wheat_2023-01-01_0");
        assert!(sanaa[0].properties.has_data);
        assert_eq!(sanaa[0].properties.extra["market"], "Sana'a market");
        assert_eq!(sanaa[0].properties.extra["shapeGroup"], "YEM");

        let aden = by_region(&outcome, "aden");
        assert_eq!(aden.len(), 1);
        assert_eq!(aden[0].properties.attributes.price, None);
        assert_eq!(aden[0].properties.commodity, UNKNOWN_COMMODITY);
        assert!(aden[0].is_placeholder());
    }

    #[test]
    fn every_feature_has_geometry_shared_with_boundary() {
        let aliases = default_aliases();
        let set = BoundarySet::from_geojson(&boundaries(), aliases, &BTreeSet::new());
        let outcome = GeoMerger::new(aliases).merge(
            &set,
            &[record("Sanaa", "Wheat", "2023-01-01", 1.0), record("Sanaa", "Rice", "2023-01-01", 2.0)],
        );

        let boundary = set.get("sanaa").unwrap();
        for feature in by_region(&outcome, "sanaa") {
            assert!(Arc::ptr_eq(&feature.geometry, &boundary.geometry));
        }
        for feature in &outcome.collection.features {
            assert!(matches!(
                feature.geometry.value,
                geojson::Value::Polygon(_)
            ));
        }
    }

    #[test]
    fn records_unmatched_regions() {
        let outcome = merge(&json!([
            record("Marib", "Wheat", "2023-01-01", 1.0),
            record("Ma'rib", "Wheat", "2023-02-01", 2.0),
            record("Atlantis", "Wheat", "2023-01-01", 3.0),
        ]));

        assert_eq!(
            outcome.unmatched_regions,
            BTreeSet::from(["atlantis".to_string(), "marib".to_string()])
        );
        // Only placeholders remain.
        assert_eq!(outcome.collection.len(), 2);
        assert!(outcome.collection.features.iter().all(MergedFeature::is_placeholder));
    }

    #[test]
    fn skips_invalid_records_with_warnings() {
        let outcome = merge(&json!([
            record("Sanaa", "Wheat", "garbage", 1.0),
            { "properties": { "admin1": "Aden" } },
            record("Aden", "Wheat", "2023-01-01", 5.0),
        ]));

        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.warnings.len(), 2);
        assert!(outcome.warnings[0].starts_with("Record 0: Invalid date"));
        assert_eq!(by_region(&outcome, "aden")[0].properties.attributes.price, Some(5.0));
        assert!(by_region(&outcome, "sanaa")[0].is_placeholder());
    }

    #[test]
    fn keeps_duplicates_by_default() {
        let outcome = merge(&json!([
            record("Sanaa", "Wheat", "2023-01-01", 100.0),
            record("Sanaa", "Wheat", "2023-01-01", 110.0),
        ]));

        let ids: Vec<&str> = by_region(&outcome, "sanaa").iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["sanaa_Wheat_2023-01-01_0", "sanaa_Wheat_2023-01-01_1"]);
        assert_eq!(outcome.skipped, 0);
    }

    #[test]
    fn dedupe_keeps_first_row() {
        let outcome = GeoMerger::new(default_aliases())
            .with_options(MergeOptions {
                dedupe: true,
                ..MergeOptions::default()
            })
            .merge_values(
                &boundaries(),
                &json!([
                    record("Sanaa", "Wheat", "2023-01-01", 100.0),
                    record("Sana'a", "wheat", "2023-01-01", 110.0),
                ]),
                &BTreeSet::new(),
            );

        let sanaa = by_region(&outcome, "sanaa");
        assert_eq!(sanaa.len(), 1);
        assert_eq!(sanaa[0].properties.attributes.price, Some(100.0));
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn applies_filter() {
        let outcome = GeoMerger::new(default_aliases())
            .with_options(MergeOptions {
                filter: MergeFilter {
                    commodity: Some("wheat".to_string()),
                    date: NaiveDate::from_ymd_opt(2023, 2, 1),
                },
                ..MergeOptions::default()
            })
            .merge_values(
                &boundaries(),
                &json!([
                    record("Sanaa", "Wheat", "2023-01-01", 1.0),
                    record("Sanaa", "Wheat", "2023-02-01", 2.0),
                    record("Aden", "Rice", "2023-02-01", 3.0),
                ]),
                &BTreeSet::new(),
            );

        let sanaa = by_region(&outcome, "sanaa");
        assert_eq!(sanaa.len(), 1);
        assert_eq!(sanaa[0].properties.attributes.price, Some(2.0));
        assert!(by_region(&outcome, "aden")[0].is_placeholder());
        assert_eq!(outcome.skipped, 0);
    }

    #[test]
    fn excluded_regions_get_no_features() {
        let outcome = GeoMerger::new(default_aliases()).merge_values(
            &boundaries(),
            &json!([record("Aden", "Wheat", "2023-01-01", 1.0)]),
            &BTreeSet::from(["aden".to_string()]),
        );

        assert!(by_region(&outcome, "aden").is_empty());
        assert!(outcome.unmatched_regions.contains("aden"));
        assert_eq!(outcome.collection.len(), 1);
    }

    #[test]
    fn empty_inputs_yield_empty_collection() {
        let merger = GeoMerger::new(default_aliases());
        let none = BTreeSet::new();

        assert!(merger.merge_values(&boundaries(), &json!([]), &none).collection.is_empty());
        assert!(merger
            .merge_values(&boundaries(), &json!({ "type": "FeatureCollection", "features": [] }), &none)
            .collection
            .is_empty());
        assert!(merger.merge_values(&boundaries(), &json!("nope"), &none).collection.is_empty());
        assert!(merger
            .merge_values(&json!({}), &json!([record("Aden", "Wheat", "2023-01-01", 1.0)]), &none)
            .collection
            .is_empty());
    }

    #[test]
    fn wraps_flat_records() {
        let features = attribute_features(&json!([
            {
                "region_id": "aden",
                "commodity": "Wheat",
                "date": "2023-01",
                "geometry": { "type": "Point", "coordinates": [45.0, 12.8] },
            },
        ]))
        .unwrap();

        assert_eq!(features[0]["properties"]["region_id"], "aden");
        assert!(features[0]["properties"].get("geometry").is_none());
        assert_eq!(features[0]["geometry"]["type"], "Point");

        let outcome = merge(&Value::Array(features));
        assert!(by_region(&outcome, "aden")[0].properties.has_data);
    }

    #[test]
    fn merge_is_deterministic() {
        let attributes = json!([
            record("Sanaa", "Wheat", "2023-01-01", 100.0),
            record("Aden", "Rice", "2023-01-01", 50.0),
            record("Aden", "Rice", "2023-01-01", 55.0),
            record("Nowhere", "Rice", "2023-01-01", 55.0),
        ]);

        let first = merge(&attributes);
        let second = merge(&attributes);

        let ids = |o: &MergeOutcome| {
            o.collection
                .features
                .iter()
                .map(|f| f.id.clone())
                .collect::<BTreeSet<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first, second);
    }
}
