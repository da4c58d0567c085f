//! Market flow processing.
//!
//! Parses origin/destination flow CSVs (header-based, column order does
//! not matter), turns each row into a [`FlowEdge`], and provides the
//! filtering and grouping used by the flow map.

use std::collections::BTreeMap;
use std::io::Read;

use chrono::NaiveDate;
use market_map_market_models::{Coordinates, FlowEdge, RawFlowRow, RegionFlowTotals};
use market_map_region::AliasTable;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SpatialError;
use crate::boundary::BoundarySet;
use crate::parsing::{parse_date, parse_number};

/// Columns a flow CSV must have for any row to be usable.
const REQUIRED_COLUMNS: &[&str] = &["source", "target"];

/// Reads flow rows from CSV.
///
/// Malformed rows are logged and skipped. A CSV without the `source` and
/// `target` columns yields no rows.
///
/// # Errors
///
/// Returns [`SpatialError`] if the header row cannot be read.
pub fn read_flow_csv<R: Read>(reader: R) -> Result<Vec<RawFlowRow>, SpatialError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(SpatialError::Conversion {
            message: "CSV file contains no header row".to_string(),
        });
    }

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .collect();
    if !missing.is_empty() {
        log::error!("Flow CSV is missing required columns: {}", missing.join(", "));
        return Ok(Vec::new());
    }

    let mut rows = Vec::new();
    for (index, result) in reader.deserialize::<RawFlowRow>().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => log::warn!("Skipping malformed flow CSV row {index}: {e}"),
        }
    }

    log::info!("Parsed {} flow rows from CSV", rows.len());
    Ok(rows)
}

/// Converts raw flow rows into edges.
#[derive(Debug, Clone)]
pub struct FlowProcessor<'a> {
    aliases: &'a AliasTable,
    strict: bool,
}

impl<'a> FlowProcessor<'a> {
    /// Creates a lenient processor: unparseable numbers become `0`.
    #[must_use]
    pub const fn new(aliases: &'a AliasTable) -> Self {
        Self {
            aliases,
            strict: false,
        }
    }

    /// In strict mode a row with a missing or unparseable number is
    /// dropped instead of zero-filled.
    #[must_use]
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Processes rows, dropping (and logging) the ones that cannot form an
    /// edge.
    #[must_use]
    pub fn process(&self, rows: &[RawFlowRow]) -> Vec<FlowEdge> {
        let mut dropped = 0_usize;
        let edges: Vec<FlowEdge> = rows
            .iter()
            .enumerate()
            .filter_map(|(index, row)| match self.process_row(row) {
                Ok(edge) => Some(edge),
                Err(reason) => {
                    log::debug!("Dropping flow row {index}: {reason}");
                    dropped += 1;
                    None
                }
            })
            .collect();

        if dropped > 0 {
            log::warn!("Dropped {dropped} of {} flow rows", rows.len());
        }

        edges
    }

    /// Processes a JSON array of row objects.
    ///
    /// Values may be strings or numbers.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Conversion`] if `value` is not an array.
    pub fn process_values(&self, value: &Value) -> Result<Vec<FlowEdge>, SpatialError> {
        Ok(self.process(&read_flow_json(value)?))
    }

    fn process_row(&self, row: &RawFlowRow) -> Result<FlowEdge, String> {
        let source = self.region(row.source.as_deref(), "source")?;
        let target = self.region(row.target.as_deref(), "target")?;

        let flow_weight = self.number(row.flow_weight.as_deref(), "flow_weight")?;
        if flow_weight < 0.0 {
            return Err(format!("negative flow_weight {flow_weight}"));
        }

        Ok(FlowEdge {
            source,
            target,
            source_coordinates: Coordinates {
                lat: self.number(row.source_lat.as_deref(), "source_lat")?,
                lng: self.number(row.source_lng.as_deref(), "source_lng")?,
            },
            target_coordinates: Coordinates {
                lat: self.number(row.target_lat.as_deref(), "target_lat")?,
                lng: self.number(row.target_lng.as_deref(), "target_lng")?,
            },
            flow_weight,
            date: row.date.as_deref().and_then(parse_date),
            commodity: row
                .commodity
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(ToString::to_string),
        })
    }

    fn region(&self, raw: Option<&str>, column: &str) -> Result<String, String> {
        let raw = raw.map(str::trim).unwrap_or_default();
        if raw.is_empty() {
            return Err(format!("missing {column}"));
        }
        let key = self.aliases.normalize(raw);
        if key.is_empty() {
            return Err(format!("{column} '{raw}' has no usable region name"));
        }
        Ok(key)
    }

    fn number(&self, raw: Option<&str>, column: &str) -> Result<f64, String> {
        let raw = raw.map(str::trim).unwrap_or_default();
        match parse_number(raw) {
            Some(value) if value.is_finite() => Ok(value),
            Some(value) => Err(format!("{column} is not finite ({value})")),
            None if self.strict => Err(format!("{column} '{raw}' is not a number")),
            None => Ok(0.0),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reads flow rows from a JSON array of row objects.
///
/// # Errors
///
/// Returns [`SpatialError::Conversion`] if `value` is not an array.
pub fn read_flow_json(value: &Value) -> Result<Vec<RawFlowRow>, SpatialError> {
    let rows = value.as_array().ok_or_else(|| SpatialError::Conversion {
        message: format!("Flow data must be an array, got {}", json_type(value)),
    })?;
    Ok(rows.iter().map(row_from_json).collect())
}

/// Reads a JSON row object into a [`RawFlowRow`], stringifying numbers.
fn row_from_json(value: &Value) -> RawFlowRow {
    let field = |name: &str| match value.get(name) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    RawFlowRow {
        source: field("source"),
        target: field("target"),
        flow_weight: field("flow_weight"),
        source_lat: field("source_lat"),
        source_lng: field("source_lng"),
        target_lat: field("target_lat"),
        target_lng: field("target_lng"),
        date: field("date"),
        commodity: field("commodity"),
    }
}

/// Restricts which edges are shown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowFilter {
    /// Only edges for this commodity (case-insensitive). Edges without a
    /// commodity always pass.
    pub commodity: Option<String>,
    /// Only edges on this date. Undated edges never pass a date filter.
    pub date: Option<NaiveDate>,
}

impl FlowFilter {
    /// Returns `true` if the edge passes the filter.
    #[must_use]
    pub fn matches(&self, edge: &FlowEdge) -> bool {
        let commodity_ok = match (self.commodity.as_deref(), edge.commodity.as_deref()) {
            (Some(wanted), Some(actual)) => wanted.trim().eq_ignore_ascii_case(actual),
            _ => true,
        };
        let date_ok = self.date.is_none_or(|d| edge.date == Some(d));
        commodity_ok && date_ok
    }

    /// Returns the edges that pass the filter.
    #[must_use]
    pub fn apply(&self, edges: &[FlowEdge]) -> Vec<FlowEdge> {
        edges.iter().filter(|e| self.matches(e)).cloned().collect()
    }
}

/// Groups dated edges by date. Undated edges are left out.
#[must_use]
pub fn group_by_date(edges: &[FlowEdge]) -> BTreeMap<NaiveDate, Vec<FlowEdge>> {
    let mut groups: BTreeMap<NaiveDate, Vec<FlowEdge>> = BTreeMap::new();
    for edge in edges {
        if let Some(date) = edge.date {
            groups.entry(date).or_default().push(edge.clone());
        }
    }
    groups
}

/// Sums inflow and outflow per region, sorted by region key.
#[must_use]
pub fn region_totals(edges: &[FlowEdge]) -> Vec<RegionFlowTotals> {
    let mut totals: BTreeMap<&str, RegionFlowTotals> = BTreeMap::new();

    for edge in edges {
        let source = totals
            .entry(edge.source.as_str())
            .or_insert_with(|| RegionFlowTotals {
                region: edge.source.clone(),
                ..RegionFlowTotals::default()
            });
        source.outflow += edge.flow_weight;
        source.edges += 1;

        let target = totals
            .entry(edge.target.as_str())
            .or_insert_with(|| RegionFlowTotals {
                region: edge.target.clone(),
                ..RegionFlowTotals::default()
            });
        target.inflow += edge.flow_weight;
        if edge.target != edge.source {
            target.edges += 1;
        }
    }

    totals.into_values().collect()
}

/// Replaces edge endpoints that have no boundary with the region their
/// coordinates fall in. Returns the number of endpoints changed.
pub fn attribute_regions(edges: &mut [FlowEdge], boundaries: &BoundarySet) -> usize {
    let mut changed = 0;

    for edge in edges.iter_mut() {
        if !boundaries.contains(&edge.source)
            && let Some(record) = boundaries.locate(
                edge.source_coordinates.lng,
                edge.source_coordinates.lat,
            )
        {
            edge.source.clone_from(&record.region_key);
            changed += 1;
        }
        if !boundaries.contains(&edge.target)
            && let Some(record) = boundaries.locate(
                edge.target_coordinates.lng,
                edge.target_coordinates.lat,
            )
        {
            edge.target.clone_from(&record.region_key);
            changed += 1;
        }
    }

    if changed > 0 {
        log::info!("Attributed {changed} flow endpoints to boundary regions by location");
    }

    changed
}
