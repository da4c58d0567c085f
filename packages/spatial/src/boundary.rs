//! Administrative boundary sets.
//!
//! Loads boundary polygons from a `GeoJSON` `FeatureCollection`, indexes
//! them by canonical region key, and builds an R-tree over the polygon
//! envelopes for point-in-polygon lookups. Boundary geometry is immutable
//! once loaded and shared by reference with every merged feature.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use geo::{BoundingRect as _, Contains as _, MultiPolygon};
use market_map_region::{AliasTable, RegionResolver};
use market_map_region_models::RegionStrategy;
use rstar::{AABB, RTree, RTreeObject};
use serde_json::{Map, Value};

/// Properties a boundary file may use for its region name, in order.
const BOUNDARY_NAME_STRATEGIES: &[RegionStrategy] =
    &[RegionStrategy::ShapeName, RegionStrategy::Adm1En];

/// One administrative region's polygon and properties.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryRecord {
    /// Canonical region key.
    pub region_key: String,
    /// Raw region name as it appeared in the boundary file.
    pub shape_name: String,
    /// All boundary feature properties.
    pub properties: Map<String, Value>,
    /// Boundary geometry.
    pub geometry: Arc<geojson::Geometry>,
}

/// A polygon stored in the R-tree, pointing back at its record.
struct BoundaryEntry {
    record: usize,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for BoundaryEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Boundary records indexed by region key and by location.
///
/// Constructed once per session and shared read-only.
pub struct BoundarySet {
    records: Vec<BoundaryRecord>,
    by_key: BTreeMap<String, usize>,
    tree: RTree<BoundaryEntry>,
    warnings: Vec<String>,
}

impl std::fmt::Debug for BoundarySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundarySet")
            .field("records", &self.records.len())
            .field("indexed_polygons", &self.tree.size())
            .field("warnings", &self.warnings.len())
            .finish()
    }
}

impl Default for BoundarySet {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            by_key: BTreeMap::new(),
            tree: RTree::new(),
            warnings: Vec::new(),
        }
    }
}

impl BoundarySet {
    /// Builds a boundary set from a `GeoJSON` `FeatureCollection`.
    ///
    /// Regions whose canonical key is in `excluded` are not indexed.
    /// Features without a usable name or geometry are skipped with a
    /// warning. If two features resolve to the same key, the first wins.
    /// A value without a `features` array yields an empty set.
    #[must_use]
    pub fn from_geojson(value: &Value, aliases: &AliasTable, excluded: &BTreeSet<String>) -> Self {
        let Some(features) = value.get("features").and_then(Value::as_array) else {
            log::error!("Boundary data has no features array");
            return Self::default();
        };

        let excluded: BTreeSet<String> = excluded
            .iter()
            .map(|key| aliases.normalize(key))
            .filter(|key| !key.is_empty())
            .collect();
        let resolver = RegionResolver::new(BOUNDARY_NAME_STRATEGIES.to_vec());

        let mut set = Self::default();
        let mut entries = Vec::new();

        for (index, feature) in features.iter().enumerate() {
            let Some(record) = set.read_feature(index, feature, aliases, &resolver) else {
                continue;
            };

            if excluded.contains(&record.region_key) {
                log::debug!("Excluding boundary region '{}'", record.region_key);
                continue;
            }

            if set.by_key.contains_key(&record.region_key) {
                set.warn(format!(
                    "Boundary {index}: duplicate region '{}' ignored",
                    record.region_key
                ));
                continue;
            }

            let position = set.records.len();
            if let Some(polygon) = to_multipolygon(&record.geometry) {
                entries.push(BoundaryEntry {
                    record: position,
                    envelope: compute_envelope(&polygon),
                    polygon,
                });
            }

            set.by_key.insert(record.region_key.clone(), position);
            set.records.push(record);
        }

        set.tree = RTree::bulk_load(entries);

        log::info!(
            "Loaded {} boundary regions ({} indexed polygons, {} skipped)",
            set.records.len(),
            set.tree.size(),
            set.warnings.len()
        );

        set
    }

    fn read_feature(
        &mut self,
        index: usize,
        feature: &Value,
        aliases: &AliasTable,
        resolver: &RegionResolver,
    ) -> Option<BoundaryRecord> {
        let Some(properties) = feature.get("properties").and_then(Value::as_object) else {
            self.warn(format!("Boundary {index}: missing properties"));
            return None;
        };

        let Some((region_key, strategy)) = resolver.resolve_with_strategy(properties, aliases)
        else {
            self.warn(format!("Boundary {index}: missing shapeName"));
            return None;
        };

        let shape_name = properties
            .get(strategy.property())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let geometry = match feature.get("geometry") {
            Some(value) if !value.is_null() => {
                match geojson::Geometry::from_json_value(value.clone()) {
                    Ok(geometry) => geometry,
                    Err(e) => {
                        self.warn(format!("Boundary {index} ('{shape_name}'): invalid geometry: {e}"));
                        return None;
                    }
                }
            }
            _ => {
                self.warn(format!("Boundary {index} ('{shape_name}'): missing geometry"));
                return None;
            }
        };

        Some(BoundaryRecord {
            region_key,
            shape_name,
            properties: properties.clone(),
            geometry: Arc::new(geometry),
        })
    }

    fn warn(&mut self, message: String) {
        log::warn!("{message}");
        self.warnings.push(message);
    }

    /// Looks up a boundary by canonical region key.
    #[must_use]
    pub fn get(&self, region_key: &str) -> Option<&BoundaryRecord> {
        self.by_key.get(region_key).map(|&i| &self.records[i])
    }

    /// Returns `true` if a boundary exists for the region key.
    #[must_use]
    pub fn contains(&self, region_key: &str) -> bool {
        self.by_key.contains_key(region_key)
    }

    /// All boundary records in file order.
    #[must_use]
    pub fn records(&self) -> &[BoundaryRecord] {
        &self.records
    }

    /// All region keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.keys().map(String::as_str)
    }

    /// Number of indexed regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no regions were indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Problems encountered while loading.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Finds the region containing a point.
    ///
    /// Admin-1 regions do not overlap, so first match wins.
    #[must_use]
    pub fn locate(&self, lng: f64, lat: f64) -> Option<&BoundaryRecord> {
        if !lng.is_finite() || !lat.is_finite() {
            return None;
        }

        let point = geo::Point::new(lng, lat);
        let query_env = AABB::from_point([lng, lat]);

        self.tree
            .locate_in_envelope_intersecting(&query_env)
            .find(|entry| entry.polygon.contains(&point))
            .map(|entry| &self.records[entry.record])
    }
}

/// Converts polygon geometry into a [`MultiPolygon`]. Other geometry
/// types are not indexed for point lookups.
fn to_multipolygon(geometry: &geojson::Geometry) -> Option<MultiPolygon<f64>> {
    let geo_geom: geo::Geometry<f64> = geometry.clone().try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_map_region::default_aliases;
    use serde_json::json;

    fn square(name: &str, x: f64, y: f64) -> Value {
        json!({
            "type": "Feature",
            "properties": { "shapeName": name, "shapeISO": format!("YE-{name}") },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[x, y], [x + 1.0, y], [x + 1.0, y + 1.0], [x, y + 1.0], [x, y]]],
            },
        })
    }

    fn collection(features: Vec<Value>) -> Value {
        json!({ "type": "FeatureCollection", "features": features })
    }

    #[test]
    fn indexes_by_canonical_key() {
        let set = BoundarySet::from_geojson(
            &collection(vec![square("Sana'a", 44.0, 15.0), square("Aden", 45.0, 12.0)]),
            default_aliases(),
            &BTreeSet::new(),
        );

        assert_eq!(set.len(), 2);
        assert_eq!(set.keys().collect::<Vec<_>>(), vec!["aden", "sanaa"]);
        let sanaa = set.get("sanaa").unwrap();
        assert_eq!(sanaa.shape_name, "Sana'a");
        assert_eq!(sanaa.properties["shapeISO"], "YE-Sana'a");
        assert!(set.warnings().is_empty());
    }

    #[test]
    fn skips_excluded_regions() {
        let excluded = BTreeSet::from(["Aden Governorate".to_string()]);
        let set = BoundarySet::from_geojson(
            &collection(vec![square("Sanaa", 44.0, 15.0), square("Aden", 45.0, 12.0)]),
            default_aliases(),
            &excluded,
        );
        assert_eq!(set.len(), 1);
        assert!(!set.contains("aden"));
    }

    #[test]
    fn keeps_first_duplicate() {
        let set = BoundarySet::from_geojson(
            &collection(vec![square("Sanaa", 44.0, 15.0), square("San'a'", 10.0, 10.0)]),
            default_aliases(),
            &BTreeSet::new(),
        );
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("sanaa").unwrap().shape_name, "Sanaa");
        assert_eq!(set.warnings().len(), 1);
    }

    #[test]
    fn skips_features_without_name_or_geometry() {
        let set = BoundarySet::from_geojson(
            &collection(vec![
                json!({ "properties": { "shapeName": "Ibb" }, "geometry": null }),
                json!({ "properties": { "shapeName": "Ibb" }, "geometry": { "type": "Polygon" } }),
                json!({ "properties": {}, "geometry": { "type": "Point", "coordinates": [0, 0] } }),
                json!({ "geometry": { "type": "Point", "coordinates": [0, 0] } }),
                json!({ "properties": { "ADM1_EN": "Ibb" }, "geometry": { "type": "Point", "coordinates": [44.2, 14.0] } }),
            ]),
            default_aliases(),
            &BTreeSet::new(),
        );
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("ibb").unwrap().shape_name, "Ibb");
        assert_eq!(set.warnings().len(), 4);
    }

    #[test]
    fn missing_features_array_is_empty() {
        let set = BoundarySet::from_geojson(&json!({ "type": "FeatureCollection" }), default_aliases(), &BTreeSet::new());
        assert!(set.is_empty());
    }

    #[test]
    fn locates_points() {
        let set = BoundarySet::from_geojson(
            &collection(vec![square("Sanaa", 44.0, 15.0), square("Aden", 45.0, 12.0)]),
            default_aliases(),
            &BTreeSet::new(),
        );

        assert_eq!(set.locate(44.5, 15.5).map(|r| r.region_key.as_str()), Some("sanaa"));
        assert_eq!(set.locate(45.2, 12.8).map(|r| r.region_key.as_str()), Some("aden"));
        assert!(set.locate(0.0, 0.0).is_none());
        assert!(set.locate(f64::NAN, 15.5).is_none());
    }
}
