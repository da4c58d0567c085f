#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the market map toolchain.
//!
//! Normalizes region names, validates attribute records, and produces the
//! merged map collection, flow edges, and residual statistics from the
//! datasets named in the configuration file.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use futures::future::AbortHandle;
use market_map_session::{DataSource, MarketConfig, MarketSession};
use market_map_spatial::parsing::parse_date;
use market_map_spatial::{FlowFilter, MergeFilter};
use serde::Serialize;

/// Build market price maps from boundary, attribute, and flow data.
#[derive(Parser)]
#[command(name = "market_map")]
#[command(about = "Build market price maps from boundary, attribute, and flow data")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "MARKET_MAP_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    sources: SourceArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Per-dataset overrides of the configured sources.
#[derive(Args)]
struct SourceArgs {
    /// Boundary `GeoJSON` (path or URL).
    #[arg(long, global = true)]
    boundaries: Option<DataSource>,

    /// Attribute data (path or URL).
    #[arg(long, global = true)]
    attributes: Option<DataSource>,

    /// Flow CSV or JSON (path or URL).
    #[arg(long, global = true)]
    flows: Option<DataSource>,

    /// Spatial weights JSON (path or URL).
    #[arg(long, global = true)]
    weights: Option<DataSource>,
}

/// Commodity and date selection shared by the data commands.
#[derive(Args)]
struct SelectionArgs {
    /// Only this commodity (case-insensitive).
    #[arg(long)]
    commodity: Option<String>,

    /// Only this date.
    #[arg(long, value_parser = parse_date_arg)]
    date: Option<NaiveDate>,
}

impl SelectionArgs {
    fn merge_filter(&self) -> MergeFilter {
        MergeFilter {
            commodity: self.commodity.clone(),
            date: self.date,
        }
    }

    fn flow_filter(&self) -> FlowFilter {
        FlowFilter {
            commodity: self.commodity.clone(),
            date: self.date,
        }
    }
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Print the canonical region key for each name.
    Normalize {
        /// Region names in any spelling.
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Check every attribute record and report the invalid ones.
    Validate {
        /// Flag records whose commodity differs from this one.
        #[arg(long)]
        commodity: Option<String>,
    },

    /// Write the merged `GeoJSON` collection.
    Merge {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Keep only the first record per region/commodity/date.
        #[arg(long)]
        dedupe: bool,

        /// Output file (default: stdout).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Write flow edges as JSON.
    Flows {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Drop rows with unparseable numbers instead of zero-filling.
        #[arg(long)]
        strict: bool,

        /// Print per-region inflow/outflow totals instead of edges.
        #[arg(long)]
        totals: bool,

        /// Output file (default: stdout).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Print residual statistics for the merged collection.
    Stats {
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Print the neighbors of a region from the spatial weights.
    Neighbors {
        /// Region name in any spelling.
        region: String,
    },
}

fn parse_date_arg(s: &str) -> Result<NaiveDate, String> {
    parse_date(s).ok_or_else(|| format!("unrecognized date '{s}'"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MarketConfig::load(path)?,
        None => MarketConfig::default(),
    };
    apply_overrides(&mut config, cli.sources);

    match cli.command {
        Commands::Normalize { names } => cmd_normalize(&config, &names),
        Commands::Validate { commodity } => {
            let session = load_session(config, &["attributes"], &[]).await?;
            cmd_validate(&session, commodity.as_deref())
        }
        Commands::Merge {
            selection,
            dedupe,
            output,
        } => {
            config.merge.dedupe |= dedupe;
            let mut session = load_session(config, &["boundaries", "attributes"], &[]).await?;
            let outcome = session.merged(&selection.merge_filter())?;
            log::info!(
                "Merged {} features ({} records skipped, {} unmatched regions)",
                outcome.collection.len(),
                outcome.skipped,
                outcome.unmatched_regions.len()
            );
            for region in &outcome.unmatched_regions {
                log::warn!("No boundary for region '{region}'");
            }
            write_json(&outcome.collection, output.as_deref())
        }
        Commands::Flows {
            selection,
            strict,
            totals,
            output,
        } => {
            config.flows.strict |= strict;
            let mut session = load_session(config, &["flows"], &["boundaries"]).await?;
            let filter = selection.flow_filter();
            if totals {
                write_json(&session.flow_totals(&filter)?, output.as_deref())
            } else {
                write_json(&session.flows(&filter)?, output.as_deref())
            }
        }
        Commands::Stats { selection } => {
            let mut session = load_session(config, &["boundaries", "attributes"], &[]).await?;
            write_json(&session.residual_statistics(&selection.merge_filter())?, None)
        }
        Commands::Neighbors { region } => {
            let session = load_session(config, &["weights"], &[]).await?;
            for neighbor in session.neighbors(&region) {
                println!("{neighbor}");
            }
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut MarketConfig, sources: SourceArgs) {
    let data = &mut config.data;
    if sources.boundaries.is_some() {
        data.boundaries = sources.boundaries;
    }
    if sources.attributes.is_some() {
        data.attributes = sources.attributes;
    }
    if sources.flows.is_some() {
        data.flows = sources.flows;
    }
    if sources.weights.is_some() {
        data.weights = sources.weights;
    }
}

/// Loads the `required` datasets, plus the `optional` ones when configured.
/// Other configured sources are not read. Ctrl-C aborts the load.
async fn load_session(
    mut config: MarketConfig,
    required: &[&'static str],
    optional: &[&'static str],
) -> Result<MarketSession, Box<dyn std::error::Error>> {
    config.data.require(required)?;
    let used: Vec<&str> = required.iter().chain(optional).copied().collect();
    config.data.retain(&used);
    let mut session = MarketSession::new(config)?;
    let (handle, registration) = AbortHandle::new_pair();

    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, aborting load");
            handle.abort();
        }
    });

    let result = session.load(registration).await;
    watcher.abort();
    result?;

    Ok(session)
}

fn cmd_normalize(config: &MarketConfig, names: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let aliases = config.alias_table()?;
    for name in names {
        println!("{name}\t{}", aliases.normalize(name));
    }
    Ok(())
}

fn cmd_validate(
    session: &MarketSession,
    commodity: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let outcomes = session.validate(commodity);
    let mut invalid = 0_usize;

    for (index, outcome) in outcomes.iter().enumerate() {
        if outcome.is_valid {
            continue;
        }
        invalid += 1;
        let region = outcome.region_id.as_deref().unwrap_or("?");
        println!("Record {index} ({region}): {}", outcome.errors.join("; "));
    }

    println!();
    println!("{} records, {invalid} invalid", outcomes.len());
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(
    value: &T,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            log::info!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
