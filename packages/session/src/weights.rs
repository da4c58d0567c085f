//! Spatial weights: which regions border which.

use std::collections::{BTreeMap, BTreeSet};

use market_map_region::AliasTable;
use serde_json::Value;

use crate::SessionError;

/// Canonical region key -> sorted canonical neighbor keys.
pub type SpatialWeights = BTreeMap<String, Vec<String>>;

/// Parses a spatial weights document.
///
/// Each entry maps a region name to either an array of neighbor names or
/// an object with a `neighbors` array. Names are normalized; entries whose
/// value has neither shape are skipped with a warning. A region is never
/// its own neighbor, and entries whose names normalize to the same key are
/// combined.
///
/// # Errors
///
/// Returns [`SessionError::Conversion`] if `value` is not a JSON object.
pub fn parse_spatial_weights(value: &Value, aliases: &AliasTable) -> Result<SpatialWeights, SessionError> {
    let entries = value.as_object().ok_or_else(|| SessionError::Conversion {
        message: "Spatial weights must be a JSON object".to_string(),
    })?;

    let mut weights: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for (name, entry) in entries {
        let key = aliases.normalize(name);
        if key.is_empty() {
            log::warn!("Skipping spatial weights entry with empty region name");
            continue;
        }

        let neighbors = match entry {
            Value::Array(items) => items,
            Value::Object(obj) => match obj.get("neighbors").and_then(Value::as_array) {
                Some(items) => items,
                None => {
                    log::warn!("Spatial weights entry '{name}' has no neighbors array");
                    continue;
                }
            },
            _ => {
                log::warn!("Spatial weights entry '{name}' is neither an array nor an object");
                continue;
            }
        };

        let set = weights.entry(key.clone()).or_default();
        for neighbor in neighbors.iter().filter_map(Value::as_str) {
            let neighbor = aliases.normalize(neighbor);
            if !neighbor.is_empty() && neighbor != key {
                set.insert(neighbor);
            }
        }
    }

    Ok(weights
        .into_iter()
        .map(|(key, neighbors)| (key, neighbors.into_iter().collect()))
        .collect())
}
