//! Region identifier resolution.
//!
//! Attribute records identify their region through one of several
//! properties depending on which tool produced them. A [`RegionResolver`]
//! holds an ordered list of [`RegionStrategy`] values and returns the key
//! produced by the first strategy that succeeds.

use market_map_region_models::RegionStrategy;
use serde_json::{Map, Value};

use crate::aliases::AliasTable;

/// Ordered list of region identifier strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionResolver {
    strategies: Vec<RegionStrategy>,
}

impl Default for RegionResolver {
    fn default() -> Self {
        Self::new(RegionStrategy::DEFAULT_ORDER.to_vec())
    }
}

impl RegionResolver {
    /// Creates a resolver that evaluates `strategies` in order.
    #[must_use]
    pub const fn new(strategies: Vec<RegionStrategy>) -> Self {
        Self { strategies }
    }

    /// The strategies in evaluation order.
    #[must_use]
    pub fn strategies(&self) -> &[RegionStrategy] {
        &self.strategies
    }

    /// Resolves the canonical region key for a set of feature properties.
    #[must_use]
    pub fn resolve(&self, properties: &Map<String, Value>, aliases: &AliasTable) -> Option<String> {
        self.resolve_with_strategy(properties, aliases)
            .map(|(key, _)| key)
    }

    /// Like [`Self::resolve`], but also reports which strategy matched.
    #[must_use]
    pub fn resolve_with_strategy(
        &self,
        properties: &Map<String, Value>,
        aliases: &AliasTable,
    ) -> Option<(String, RegionStrategy)> {
        self.strategies.iter().find_map(|strategy| {
            read_strategy(*strategy, properties, aliases).map(|key| (key, *strategy))
        })
    }
}

/// Applies one strategy. Absent, non-string, and empty values yield `None`.
fn read_strategy(
    strategy: RegionStrategy,
    properties: &Map<String, Value>,
    aliases: &AliasTable,
) -> Option<String> {
    properties
        .get(strategy.property())
        .and_then(Value::as_str)
        .map(|raw| aliases.normalize(raw))
        .filter(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_aliases;

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn prefers_region_id() {
        let resolver = RegionResolver::default();
        let p = props(serde_json::json!({
            "region_id": "aden",
            "admin1": "Sana'a",
        }));
        assert_eq!(
            resolver.resolve_with_strategy(&p, default_aliases()),
            Some(("aden".to_string(), RegionStrategy::RegionId))
        );
    }

    #[test]
    fn falls_through_missing_and_empty_values() {
        let resolver = RegionResolver::default();
        let p = props(serde_json::json!({
            "region_id": "   ",
            "admin1": null,
            "shapeName": "Ta'izz Governorate",
            "ADM1_EN": "Aden",
        }));
        assert_eq!(
            resolver.resolve_with_strategy(&p, default_aliases()),
            Some(("taizz".to_string(), RegionStrategy::ShapeName))
        );
    }

    #[test]
    fn uses_adm1_en_last() {
        let resolver = RegionResolver::default();
        let p = props(serde_json::json!({ "ADM1_EN": "Hodeidah" }));
        assert_eq!(
            resolver.resolve(&p, default_aliases()),
            Some("al hudaydah".to_string())
        );
    }

    #[test]
    fn ignores_non_string_identifiers() {
        let resolver = RegionResolver::default();
        let p = props(serde_json::json!({ "region_id": 12, "admin1": ["aden"] }));
        assert_eq!(resolver.resolve(&p, default_aliases()), None);
    }

    #[test]
    fn honors_custom_order() {
        let resolver = RegionResolver::new(vec![RegionStrategy::Adm1En, RegionStrategy::RegionId]);
        let p = props(serde_json::json!({ "region_id": "aden", "ADM1_EN": "Ibb" }));
        assert_eq!(resolver.resolve(&p, default_aliases()), Some("ibb".to_string()));
    }
}
