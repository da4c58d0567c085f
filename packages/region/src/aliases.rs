//! Region alias tables.
//!
//! An [`AliasTable`] maps every known spelling of a region (after the
//! normalization pipeline has run) to its canonical key. The built-in
//! table is embedded via `include_str!`; callers can extend it or build
//! their own from TOML.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use market_map_region_models::{AliasDefinition, AliasGroup};

use crate::RegionError;
use crate::normalize::canonical_form;

/// Embedded TOML alias definitions.
const ALIAS_TOMLS: &[(&str, &str)] = &[(
    "yemen_admin1",
    include_str!("../aliases/yemen_admin1.toml"),
)];

static DEFAULT_ALIASES: LazyLock<AliasTable> = LazyLock::new(|| {
    let mut table = AliasTable::default();
    for (name, toml_str) in ALIAS_TOMLS {
        let definition: AliasDefinition = toml::de::from_str(toml_str)
            .unwrap_or_else(|e| panic!("Failed to parse alias table '{name}': {e}"));
        table
            .add_definition(&definition)
            .unwrap_or_else(|e| panic!("Invalid alias table '{name}': {e}"));
    }
    table
});

/// Returns the built-in alias table.
///
/// # Panics
///
/// Panics on first use if an embedded TOML table fails to parse or
/// contains conflicting aliases. These are compile-time constants, so a
/// failure indicates a development error and is caught by the tests below.
#[must_use]
pub fn default_aliases() -> &'static AliasTable {
    &DEFAULT_ALIASES
}

/// Normalized spelling -> canonical region key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    aliases: BTreeMap<String, String>,
    canonical: BTreeSet<String>,
}

impl AliasTable {
    /// Parses an alias table from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError`] if the TOML is malformed or two regions
    /// claim the same spelling.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, RegionError> {
        let definition: AliasDefinition = toml::de::from_str(toml_str)?;
        let mut table = Self::default();
        table.add_definition(&definition)?;
        Ok(table)
    }

    /// Adds every alias group of a definition.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::Conflict`] if a spelling is already mapped to
    /// a different canonical key.
    pub fn add_definition(&mut self, definition: &AliasDefinition) -> Result<(), RegionError> {
        for group in &definition.regions {
            self.add_group(group)?;
        }
        log::debug!(
            "Alias table '{}' loaded ({} spellings, {} regions)",
            definition.id,
            self.aliases.len(),
            self.canonical.len()
        );
        Ok(())
    }

    /// Adds one alias group.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError`] if the canonical name is empty after
    /// normalization or a spelling conflicts with another region.
    pub fn add_group(&mut self, group: &AliasGroup) -> Result<(), RegionError> {
        let canonical = canonical_form(&group.canonical);
        if canonical.is_empty() {
            return Err(RegionError::EmptyCanonical {
                name: group.canonical.clone(),
            });
        }

        self.insert(canonical.clone(), &canonical)?;
        self.canonical.insert(canonical.clone());

        for variant in &group.variants {
            let key = canonical_form(variant);
            if key.is_empty() {
                log::warn!("Ignoring empty alias {variant:?} for region '{canonical}'");
                continue;
            }
            self.insert(key, &canonical)?;
        }

        Ok(())
    }

    /// Merges extra aliases (canonical -> variants), as found in config files.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError`] on conflicts with existing entries.
    pub fn extend_from_map(
        &mut self,
        extra: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), RegionError> {
        for (canonical, variants) in extra {
            self.add_group(&AliasGroup {
                canonical: canonical.clone(),
                variants: variants.clone(),
            })?;
        }
        Ok(())
    }

    fn insert(&mut self, key: String, canonical: &str) -> Result<(), RegionError> {
        match self.aliases.get(&key) {
            Some(existing) if existing != canonical => Err(RegionError::Conflict {
                alias: key,
                existing: existing.clone(),
                requested: canonical.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.aliases.insert(key, canonical.to_string());
                Ok(())
            }
        }
    }

    /// Runs the full normalization pipeline against this table.
    #[must_use]
    pub fn normalize(&self, raw: &str) -> String {
        let key = canonical_form(raw);
        if key.is_empty() {
            return key;
        }
        self.aliases.get(&key).cloned().unwrap_or(key)
    }

    /// Looks up an already-normalized spelling.
    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<&str> {
        self.aliases.get(key).map(String::as_str)
    }

    /// Returns `true` if `key` is the canonical key of a known region.
    #[must_use]
    pub fn is_canonical(&self, key: &str) -> bool {
        self.canonical.contains(key)
    }

    /// Iterates over all canonical region keys.
    pub fn canonical_keys(&self) -> impl Iterator<Item = &str> {
        self.canonical.iter().map(String::as_str)
    }

    /// Number of known spellings, canonical keys included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// Returns `true` if the table holds no aliases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
