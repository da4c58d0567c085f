//! Attribute feature validation.
//!
//! Every rule is checked and every violation is reported, so one pass
//! over a record surfaces all of its problems at once.

use market_map_market_models::{NUMERIC_FIELDS, ValidationOutcome};
use market_map_region::{AliasTable, RegionResolver};
use serde_json::{Map, Value};

use crate::parsing::parse_date;

/// Toggles for optional validation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRules {
    /// Require a `geometry` object with `type` and `coordinates`.
    pub require_geometry: bool,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            require_geometry: true,
        }
    }
}

/// Validates attribute features against a region resolver and alias table.
#[derive(Debug, Clone)]
pub struct FeatureValidator<'a> {
    resolver: &'a RegionResolver,
    aliases: &'a AliasTable,
    rules: ValidationRules,
}

impl<'a> FeatureValidator<'a> {
    /// Creates a validator with the default rules.
    #[must_use]
    pub fn new(resolver: &'a RegionResolver, aliases: &'a AliasTable) -> Self {
        Self {
            resolver,
            aliases,
            rules: ValidationRules::default(),
        }
    }

    /// Overrides the optional rules.
    #[must_use]
    pub const fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    /// Validates one feature.
    ///
    /// If `expected_commodity` is given, the feature's commodity must match
    /// it case-insensitively.
    #[must_use]
    pub fn validate(&self, feature: &Value, expected_commodity: Option<&str>) -> ValidationOutcome {
        let mut errors = Vec::new();
        let mut region_id = None;

        match feature.get("properties").and_then(Value::as_object) {
            Some(props) => {
                check_date(props, &mut errors);
                let commodity = check_commodity(props, &mut errors);

                region_id = self.resolver.resolve(props, self.aliases);
                if region_id.is_none() {
                    let tried: Vec<String> = self
                        .resolver
                        .strategies()
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    errors.push(format!(
                        "Missing region identifier (tried {})",
                        tried.join(", ")
                    ));
                }

                check_numeric_fields(props, &mut errors);

                if self.rules.require_geometry {
                    check_geometry(feature, &mut errors);
                }

                if let (Some(expected), Some(actual)) = (expected_commodity, commodity)
                    && !expected.trim().eq_ignore_ascii_case(actual)
                {
                    errors.push(format!(
                        "Commodity mismatch: expected '{expected}', found '{actual}'"
                    ));
                }
            }
            None => {
                errors.push("Missing properties".to_string());
                if self.rules.require_geometry {
                    check_geometry(feature, &mut errors);
                }
            }
        }

        ValidationOutcome {
            is_valid: errors.is_empty(),
            errors,
            region_id,
        }
    }
}

/// Validates a feature with the default resolver and rules.
#[must_use]
pub fn validate_feature(
    feature: &Value,
    expected_commodity: Option<&str>,
    aliases: &AliasTable,
) -> ValidationOutcome {
    let resolver = RegionResolver::default();
    FeatureValidator::new(&resolver, aliases).validate(feature, expected_commodity)
}

fn check_date(props: &Map<String, Value>, errors: &mut Vec<String>) {
    match props.get("date") {
        None | Some(Value::Null) => errors.push("Missing date".to_string()),
        Some(Value::String(s)) if s.trim().is_empty() => errors.push("Missing date".to_string()),
        Some(Value::String(s)) => {
            if parse_date(s).is_none() {
                errors.push(format!("Invalid date: '{s}'"));
            }
        }
        Some(other) => errors.push(format!("Invalid date: {other}")),
    }
}

fn check_commodity<'p>(props: &'p Map<String, Value>, errors: &mut Vec<String>) -> Option<&'p str> {
    let commodity = props
        .get("commodity")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if commodity.is_none() {
        errors.push("Missing commodity".to_string());
    }
    commodity
}

fn check_numeric_fields(props: &Map<String, Value>, errors: &mut Vec<String>) {
    for field in NUMERIC_FIELDS {
        match props.get(*field) {
            None | Some(Value::Null) => {}
            Some(Value::Number(n)) if n.as_f64().is_some_and(f64::is_finite) => {}
            Some(other) => errors.push(format!("Invalid numeric field '{field}': {other}")),
        }
    }
}

fn check_geometry(feature: &Value, errors: &mut Vec<String>) {
    let Some(geometry) = feature.get("geometry").and_then(Value::as_object) else {
        errors.push("Missing geometry".to_string());
        return;
    };
    if !geometry.get("type").is_some_and(Value::is_string) {
        errors.push("Missing geometry type".to_string());
    }
    if !geometry.get("coordinates").is_some_and(Value::is_array) {
        errors.push("Missing geometry coordinates".to_string());
    }
}
