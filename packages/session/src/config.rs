//! TOML configuration.
//!
//! Every section is optional. An empty file yields the defaults: no data
//! sources, no exclusions, duplicates kept, lenient flow parsing, and a
//! 30 minute / 50 entry / 100 KiB cache.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use market_map_cache::CacheConfig;
use market_map_region::{AliasTable, default_aliases};
use market_map_spatial::ValidationRules;
use serde::{Deserialize, Serialize};

use crate::SessionError;

/// Where a dataset is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataSource {
    /// Local file.
    Path(PathBuf),
    /// `http://` or `https://` URL.
    Url(String),
}

impl DataSource {
    /// Returns `true` if the source names a `.json` or `.geojson` file.
    #[must_use]
    pub fn is_json(&self) -> bool {
        let name = match self {
            Self::Path(path) => path.to_string_lossy().to_ascii_lowercase(),
            Self::Url(url) => url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase(),
        };
        name.ends_with(".json") || name.ends_with(".geojson")
    }

    /// Resolves a relative path against `base`. URLs and absolute paths
    /// are returned unchanged.
    #[must_use]
    pub fn relative_to(self, base: &Path) -> Self {
        match self {
            Self::Path(path) if path.is_relative() => Self::Path(base.join(path)),
            other => other,
        }
    }
}

impl From<String> for DataSource {
    fn from(value: String) -> Self {
        let lower = value.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(value)
        } else {
            Self::Path(PathBuf::from(value))
        }
    }
}

impl From<&str> for DataSource {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<DataSource> for String {
    fn from(value: DataSource) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
        }
    }
}

/// `[data]`: dataset locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Boundary polygons (GeoJSON `FeatureCollection`).
    pub boundaries: Option<DataSource>,
    /// Market attribute records (GeoJSON or JSON array).
    pub attributes: Option<DataSource>,
    /// Flow rows (CSV, or a JSON array when the name ends in `.json`).
    pub flows: Option<DataSource>,
    /// Spatial weights (JSON object).
    pub weights: Option<DataSource>,
}

impl DataConfig {
    /// Fails with [`SessionError::MissingSource`] for the first of `names`
    /// (`"boundaries"`, `"attributes"`, `"flows"`, `"weights"`) that is not
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingSource`] naming the missing dataset.
    pub fn require(&self, names: &[&'static str]) -> Result<(), SessionError> {
        for &name in names {
            if self.source(name).is_none() {
                return Err(SessionError::MissingSource { name });
            }
        }
        Ok(())
    }

    /// Clears every source not named in `names`, so a load reads only
    /// what the caller uses.
    pub fn retain(&mut self, names: &[&str]) {
        let keep = |name: &str, source: &mut Option<DataSource>| {
            if !names.contains(&name) {
                *source = None;
            }
        };
        keep("boundaries", &mut self.boundaries);
        keep("attributes", &mut self.attributes);
        keep("flows", &mut self.flows);
        keep("weights", &mut self.weights);
    }

    /// The source configured under `name`, if any.
    #[must_use]
    pub fn source(&self, name: &str) -> Option<&DataSource> {
        match name {
            "boundaries" => self.boundaries.as_ref(),
            "attributes" => self.attributes.as_ref(),
            "flows" => self.flows.as_ref(),
            "weights" => self.weights.as_ref(),
            _ => None,
        }
    }
}

/// `[merge]`: join behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Boundary regions left out of the map entirely.
    pub excluded_regions: Vec<String>,
    /// Keep only the first record per region/commodity/date.
    pub dedupe: bool,
    /// Reject attribute records without a geometry.
    pub require_geometry: bool,
    /// Additional aliases, canonical name -> variants.
    pub extra_aliases: BTreeMap<String, Vec<String>>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            excluded_regions: Vec::new(),
            dedupe: false,
            require_geometry: true,
            extra_aliases: BTreeMap::new(),
        }
    }
}

impl MergeConfig {
    /// Validation rules implied by this section.
    #[must_use]
    pub const fn rules(&self) -> ValidationRules {
        ValidationRules {
            require_geometry: self.require_geometry,
        }
    }
}

/// `[flows]`: flow parsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Drop rows with unparseable numbers instead of zero-filling them.
    pub strict: bool,
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Dataset locations.
    pub data: DataConfig,
    /// Join behaviour.
    pub merge: MergeConfig,
    /// Flow parsing.
    pub flows: FlowConfig,
    /// Cache limits.
    pub cache: CacheConfig,
}

impl MarketConfig {
    /// Parses a configuration from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Toml`] if the TOML is malformed.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, SessionError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Reads a configuration file. Relative data paths are resolved
    /// against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let contents = std::fs::read_to_string(path).map_err(|error| SessionError::Read {
            path: path.display().to_string(),
            error,
        })?;
        let config = Self::from_toml_str(&contents)?;
        log::info!("Loaded configuration from {}", path.display());

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.relative_to(base))
    }

    /// Resolves every relative data path against `base`.
    #[must_use]
    pub fn relative_to(mut self, base: &Path) -> Self {
        let resolve = |source: Option<DataSource>| source.map(|s| s.relative_to(base));
        self.data.boundaries = resolve(self.data.boundaries);
        self.data.attributes = resolve(self.data.attributes);
        self.data.flows = resolve(self.data.flows);
        self.data.weights = resolve(self.data.weights);
        self
    }

    /// The built-in alias table extended with `merge.extra_aliases`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Region`] if an extra alias conflicts with an
    /// existing one.
    pub fn alias_table(&self) -> Result<AliasTable, SessionError> {
        let mut table = default_aliases().clone();
        table.extend_from_map(&self.merge.extra_aliases)?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = MarketConfig::from_toml_str("").unwrap();
        assert_eq!(config, MarketConfig::default());
        assert!(!config.merge.dedupe);
        assert!(config.merge.require_geometry);
        assert!(!config.flows.strict);
        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.cache.ttl_secs, 1800);
        assert_eq!(config.cache.compression_threshold_bytes, 102_400);
    }

    #[test]
    fn parses_full_config() {
        let config = MarketConfig::from_toml_str(
            r#"
            [data]
            boundaries = "data/boundaries.geojson"
            attributes = "https://example.org/unified_data.geojson"
            flows = "data/flow_maps.csv"

            [merge]
            excluded_regions = ["sanaa city"]
            dedupe = true
            require_geometry = false
            extra_aliases = { "sanaa" = ["sanaa capital"] }

            [flows]
            strict = true

            [cache]
            max_entries = 10
            "#,
        )
        .unwrap();

        assert_eq!(
            config.data.boundaries,
            Some(DataSource::Path(PathBuf::from("data/boundaries.geojson")))
        );
        assert_eq!(
            config.data.attributes,
            Some(DataSource::Url(
                "https://example.org/unified_data.geojson".to_string()
            ))
        );
        assert_eq!(config.data.weights, None);
        assert_eq!(config.merge.excluded_regions, vec!["sanaa city"]);
        assert!(config.merge.dedupe);
        assert!(!config.merge.rules().require_geometry);
        assert!(config.flows.strict);
        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.cache.ttl_secs, 1800);

        let aliases = config.alias_table().unwrap();
        assert_eq!(aliases.normalize("Sanaa Capital"), "sanaa");
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            MarketConfig::from_toml_str("[data\nboundaries = 1"),
            Err(SessionError::Toml(_))
        ));
    }

    #[test]
    fn conflicting_extra_alias_is_an_error() {
        let config = MarketConfig::from_toml_str(
            r#"
            [merge]
            extra_aliases = { "aden" = ["sanaa"] }
            "#,
        )
        .unwrap();
        assert!(matches!(config.alias_table(), Err(SessionError::Region(_))));
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let config = MarketConfig::from_toml_str(
            r#"
            [data]
            boundaries = "boundaries.geojson"
            attributes = "/srv/attributes.json"
            weights = "http://example.org/weights.json"
            "#,
        )
        .unwrap()
        .relative_to(Path::new("/etc/market"));

        assert_eq!(
            config.data.boundaries,
            Some(DataSource::Path(PathBuf::from("/etc/market/boundaries.geojson")))
        );
        assert_eq!(
            config.data.attributes,
            Some(DataSource::Path(PathBuf::from("/srv/attributes.json")))
        );
        assert_eq!(
            config.data.weights,
            Some(DataSource::Url("http://example.org/weights.json".to_string()))
        );
    }

    #[test]
    fn require_names_the_first_missing_source() {
        let data = DataConfig {
            attributes: Some(DataSource::from("attributes.json")),
            ..DataConfig::default()
        };
        assert!(data.require(&["attributes"]).is_ok());
        assert!(matches!(
            data.require(&["attributes", "boundaries", "weights"]),
            Err(SessionError::MissingSource { name: "boundaries" })
        ));
        assert!(matches!(
            data.require(&["weights"]),
            Err(SessionError::MissingSource { name: "weights" })
        ));
    }

    #[test]
    fn retain_clears_unused_sources() {
        let mut data = DataConfig {
            boundaries: Some(DataSource::from("boundaries.geojson")),
            attributes: Some(DataSource::from("attributes.json")),
            flows: Some(DataSource::from("flows.csv")),
            weights: Some(DataSource::from("weights.json")),
        };
        data.retain(&["weights", "flows"]);

        assert_eq!(data.boundaries, None);
        assert_eq!(data.attributes, None);
        assert_eq!(data.source("flows"), Some(&DataSource::from("flows.csv")));
        assert_eq!(data.source("weights"), Some(&DataSource::from("weights.json")));
        assert_eq!(data.source("other"), None);
    }

    #[test]
    fn detects_json_sources() {
        assert!(DataSource::from("flows.json").is_json());
        assert!(DataSource::from("https://x.org/a.GeoJSON?v=2").is_json());
        assert!(!DataSource::from("flow_maps.csv").is_json());
    }
}
