#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Market map session.
//!
//! A [`MarketSession`] owns the configuration, the alias table, the loaded
//! datasets, and the cache of derived views. Loading is all-or-nothing:
//! every configured source is fetched and parsed into locals first, and
//! the session only changes once everything succeeded. A load can be
//! cancelled through an [`AbortRegistration`]; a cancelled load leaves the
//! session exactly as it was.

pub mod config;
pub mod fetch;
pub mod weights;

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::{AbortRegistration, Abortable};
use market_map_cache::{CacheError, CacheStats, Clock, MarketCache, SystemClock, cache_key, fingerprint};
use market_map_market_models::{FlowEdge, RawFlowRow, RegionFlowTotals, ValidationOutcome};
use market_map_region::{AliasTable, RegionError, RegionResolver};
use market_map_spatial::flows::{attribute_regions, read_flow_csv, read_flow_json, region_totals};
use market_map_spatial::merge::attribute_features;
use market_map_spatial::{
    BoundarySet, FeatureValidator, FlowFilter, FlowProcessor, GeoMerger, MergeFilter, MergeOptions,
    MergeOutcome, SpatialError,
};
use market_map_stats::{ColorDomain, ResidualStatistics};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use config::{DataConfig, DataSource, FlowConfig, MarketConfig, MergeConfig};
pub use fetch::fetch_text;
pub use weights::{SpatialWeights, parse_spatial_weights};

/// Errors that can occur while configuring or loading a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A local file could not be read.
    #[error("Failed to read {path}: {error}")]
    Read {
        /// File path.
        path: String,
        /// Underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// An HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A URL answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// Configuration TOML was malformed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A dataset was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The alias table could not be built.
    #[error(transparent)]
    Region(#[from] RegionError),

    /// A dataset could not be processed.
    #[error(transparent)]
    Spatial(#[from] SpatialError),

    /// A derived view could not be cached.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A required data source is not configured.
    #[error("No {name} source configured")]
    MissingSource {
        /// Dataset name.
        name: &'static str,
    },

    /// Input had the wrong container shape.
    #[error("Conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// The load was cancelled.
    #[error("Load aborted")]
    Aborted,
}

/// Everything a session works on. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Datasets {
    /// Boundary polygons keyed by canonical region.
    pub boundaries: Arc<BoundarySet>,
    /// Attribute features.
    pub attributes: Arc<Vec<Value>>,
    /// Raw flow rows.
    pub flow_rows: Arc<Vec<RawFlowRow>>,
    /// Region adjacency.
    pub weights: Arc<SpatialWeights>,
}

impl Datasets {
    /// Builds datasets from boundary and attribute JSON.
    ///
    /// Boundary data without a `features` array yields an empty boundary
    /// set (logged), so every merged view is empty.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Conversion`] if the attributes are neither
    /// a `FeatureCollection` nor an array.
    pub fn from_json(
        boundaries: &Value,
        attributes: &Value,
        aliases: &AliasTable,
        excluded: &BTreeSet<String>,
    ) -> Result<Self, SessionError> {
        Self::default()
            .with_boundaries(boundaries, aliases, excluded)
            .with_attributes(attributes)
    }

    /// Replaces the boundaries with those read from `GeoJSON`.
    #[must_use]
    pub fn with_boundaries(
        mut self,
        boundaries: &Value,
        aliases: &AliasTable,
        excluded: &BTreeSet<String>,
    ) -> Self {
        self.boundaries = Arc::new(BoundarySet::from_geojson(boundaries, aliases, excluded));
        self
    }

    /// Replaces the attribute features.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Conversion`] if `attributes` is neither a
    /// `FeatureCollection` nor an array.
    pub fn with_attributes(mut self, attributes: &Value) -> Result<Self, SessionError> {
        let features = attribute_features(attributes).ok_or_else(|| SessionError::Conversion {
            message: "Attribute data must be a FeatureCollection or an array".to_string(),
        })?;
        self.attributes = Arc::new(features);
        Ok(self)
    }

    /// Replaces the flow rows.
    #[must_use]
    pub fn with_flow_rows(mut self, rows: Vec<RawFlowRow>) -> Self {
        self.flow_rows = Arc::new(rows);
        self
    }

    /// Replaces the spatial weights.
    #[must_use]
    pub fn with_weights(mut self, weights: SpatialWeights) -> Self {
        self.weights = Arc::new(weights);
        self
    }

    /// Content fingerprint used to key derived views.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Json`] if the data cannot be serialized.
    pub fn fingerprint(&self) -> Result<String, SessionError> {
        let boundaries: Vec<(&str, &geojson::Geometry)> = self
            .boundaries
            .records()
            .iter()
            .map(|record| (record.region_key.as_str(), record.geometry.as_ref()))
            .collect();
        let content = serde_json::to_vec(&(
            boundaries,
            self.attributes.as_ref(),
            self.flow_rows.as_ref(),
            self.weights.as_ref(),
        ))?;
        Ok(fingerprint(&content))
    }
}

/// Raw text of every configured source.
struct SourceTexts {
    boundaries: Option<String>,
    attributes: Option<String>,
    flows: Option<String>,
    weights: Option<String>,
}

/// Result of a `stats` query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidualSummary {
    /// Residual distribution.
    pub statistics: ResidualStatistics,
    /// Zero-centered color domain clipped to the 5th/95th percentiles.
    pub color_domain: ColorDomain,
}

/// Lower quantile for residual color domains.
const DOMAIN_LOWER_QUANTILE: f64 = 0.05;

/// Upper quantile for residual color domains.
const DOMAIN_UPPER_QUANTILE: f64 = 0.95;

/// Configured datasets plus memoized views.
pub struct MarketSession<C: Clock = SystemClock> {
    config: MarketConfig,
    aliases: AliasTable,
    excluded: BTreeSet<String>,
    cache: MarketCache<C>,
    datasets: Datasets,
    fingerprint: String,
    client: reqwest::Client,
}

impl<C: Clock> std::fmt::Debug for MarketSession<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketSession")
            .field("config", &self.config)
            .field("datasets", &self.datasets)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl MarketSession<SystemClock> {
    /// Creates an empty session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the configured aliases conflict.
    pub fn new(config: MarketConfig) -> Result<Self, SessionError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> MarketSession<C> {
    /// Creates an empty session whose cache uses `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the configured aliases conflict.
    pub fn with_clock(config: MarketConfig, clock: C) -> Result<Self, SessionError> {
        let aliases = config.alias_table()?;
        let excluded = config.merge.excluded_regions.iter().cloned().collect();
        let datasets = Datasets::default();
        let fingerprint = datasets.fingerprint()?;

        Ok(Self {
            cache: MarketCache::with_clock(config.cache, clock),
            config,
            aliases,
            excluded,
            datasets,
            fingerprint,
            client: reqwest::Client::new(),
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// The alias table in use.
    #[must_use]
    pub const fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// The loaded datasets.
    #[must_use]
    pub const fn datasets(&self) -> &Datasets {
        &self.datasets
    }

    /// Cache diagnostics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Loads every configured source and swaps the result in.
    ///
    /// Sources that are not configured stay empty; callers that need a
    /// particular dataset check [`DataConfig::require`] first. Sources are
    /// fetched concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Aborted`] if the load was cancelled, or any
    /// fetch or parse error. In both cases the session is unchanged.
    pub async fn load(&mut self, registration: AbortRegistration) -> Result<(), SessionError> {
        let datasets = Abortable::new(self.read_sources(), registration)
            .await
            .map_err(|_| {
                log::warn!("Dataset load aborted; keeping previous data");
                SessionError::Aborted
            })??;

        self.install(datasets)
    }

    async fn read_sources(&self) -> Result<Datasets, SessionError> {
        let data = &self.config.data;
        let (boundaries, attributes, flows, weights) = futures::future::try_join4(
            fetch::fetch_optional(data.boundaries.as_ref(), &self.client),
            fetch::fetch_optional(data.attributes.as_ref(), &self.client),
            fetch::fetch_optional(data.flows.as_ref(), &self.client),
            fetch::fetch_optional(data.weights.as_ref(), &self.client),
        )
        .await?;

        self.parse_sources(SourceTexts {
            boundaries,
            attributes,
            flows,
            weights,
        })
    }

    fn parse_sources(&self, texts: SourceTexts) -> Result<Datasets, SessionError> {
        let mut datasets = Datasets::default();

        if let Some(boundaries) = texts.boundaries {
            let boundaries: Value = serde_json::from_str(&boundaries)?;
            datasets = datasets.with_boundaries(&boundaries, &self.aliases, &self.excluded);
        }

        if let Some(attributes) = texts.attributes {
            datasets = datasets.with_attributes(&serde_json::from_str(&attributes)?)?;
        }

        if let Some(flows) = texts.flows {
            let json_flows = self.config.data.flows.as_ref().is_some_and(DataSource::is_json);
            let rows = if json_flows {
                read_flow_json(&serde_json::from_str(&flows)?)?
            } else {
                read_flow_csv(flows.as_bytes())?
            };
            datasets = datasets.with_flow_rows(rows);
        }

        if let Some(weights) = texts.weights {
            let weights = parse_spatial_weights(&serde_json::from_str(&weights)?, &self.aliases)?;
            datasets = datasets.with_weights(weights);
        }

        Ok(datasets)
    }

    /// Replaces the session's datasets and drops every memoized view.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Json`] if the datasets cannot be
    /// fingerprinted; the session is then unchanged.
    pub fn install(&mut self, datasets: Datasets) -> Result<(), SessionError> {
        let fingerprint = datasets.fingerprint()?;
        log::info!(
            "Installed {} boundaries, {} attribute records, {} flow rows, {} weighted regions",
            datasets.boundaries.len(),
            datasets.attributes.len(),
            datasets.flow_rows.len(),
            datasets.weights.len()
        );

        self.datasets = datasets;
        self.fingerprint = fingerprint;
        self.cache.clear();
        Ok(())
    }

    fn key<O: Serialize + ?Sized>(&self, kind: &str, options: &O) -> Result<String, SessionError> {
        Ok(cache_key(kind, self.fingerprint.as_bytes(), options)?)
    }

    /// The merged collection for `filter`, memoized.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Cache`] if the result cannot be cached.
    pub fn merged(&mut self, filter: &MergeFilter) -> Result<MergeOutcome, SessionError> {
        let key = self.key("merged", filter)?;
        if let Some(outcome) = self.cache.get::<MergeOutcome>(&key) {
            return Ok(outcome);
        }

        let options = MergeOptions {
            dedupe: self.config.merge.dedupe,
            expected_commodity: None,
            rules: self.config.merge.rules(),
            filter: filter.clone(),
        };
        let outcome = GeoMerger::new(&self.aliases)
            .with_options(options)
            .merge(&self.datasets.boundaries, &self.datasets.attributes);

        self.cache.set(key, &outcome)?;
        Ok(outcome)
    }

    /// Flow edges matching `filter`, memoized.
    ///
    /// Endpoints that do not name a known boundary are attributed by point
    /// lookup of their coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Cache`] if the result cannot be cached.
    pub fn flows(&mut self, filter: &FlowFilter) -> Result<Vec<FlowEdge>, SessionError> {
        let key = self.key("flows", &(filter, self.config.flows.strict))?;
        if let Some(edges) = self.cache.get::<Vec<FlowEdge>>(&key) {
            return Ok(edges);
        }

        let mut edges = FlowProcessor::new(&self.aliases)
            .strict(self.config.flows.strict)
            .process(&self.datasets.flow_rows);
        attribute_regions(&mut edges, &self.datasets.boundaries);
        let edges = filter.apply(&edges);

        self.cache.set(key, &edges)?;
        Ok(edges)
    }

    /// Per-region inflow/outflow totals for the edges matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Cache`] if the underlying edges cannot be
    /// cached.
    pub fn flow_totals(&mut self, filter: &FlowFilter) -> Result<Vec<RegionFlowTotals>, SessionError> {
        Ok(region_totals(&self.flows(filter)?))
    }

    /// Residual summary of the merged collection for `filter`, memoized.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Cache`] if a result cannot be cached.
    pub fn residual_statistics(&mut self, filter: &MergeFilter) -> Result<ResidualSummary, SessionError> {
        let key = self.key("residuals", filter)?;
        if let Some(summary) = self.cache.get::<ResidualSummary>(&key) {
            return Ok(summary);
        }

        let residuals = self.merged(filter)?.collection.residuals();
        let summary = ResidualSummary {
            statistics: ResidualStatistics::from_values(&residuals),
            color_domain: ColorDomain::from_values(&residuals, DOMAIN_LOWER_QUANTILE, DOMAIN_UPPER_QUANTILE)
                .symmetric(),
        };

        self.cache.set(key, &summary)?;
        Ok(summary)
    }

    /// Validates every attribute record.
    #[must_use]
    pub fn validate(&self, expected_commodity: Option<&str>) -> Vec<ValidationOutcome> {
        let resolver = RegionResolver::default();
        let validator =
            FeatureValidator::new(&resolver, &self.aliases).with_rules(self.config.merge.rules());
        self.datasets
            .attributes
            .iter()
            .map(|feature| validator.validate(feature, expected_commodity))
            .collect()
    }

    /// Neighbors of `region` (any spelling). Empty if unknown.
    #[must_use]
    pub fn neighbors(&self, region: &str) -> &[String] {
        let key = self.aliases.normalize(region);
        self.datasets
            .weights
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
