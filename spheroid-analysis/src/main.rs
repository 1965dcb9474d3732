//! spheroid-analysis - command line front end
//!
//! Runs the analysis stages against one experiment database. Every command
//! prints a JSON summary on stdout; logs go to stderr (or the configured
//! log file).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use spheroid_analysis::debarcode::{DebarcodeParams, Debarcoder, GroupBy, ThresholdStrategy};
use spheroid_analysis::filters::{
    evaluate_ambiguity, evaluate_sphere, run_quality_filters, AmbiguityParams, FilterComposer, FilterSource,
    SphereParams, AMBIGUOUS_FILTER, HQ_FILTER, SPHERE_FILTER,
};
use spheroid_analysis::neighbors::{AggregateRequest, NeighborAggregator, Reduction};
use spheroid_analysis::{condition_summary, ingest};
use spheroid_common::config::Config;
use spheroid_common::db::{init_database, TabularStore};
use spheroid_common::{MeasurementIndex, MeasurementSelector, Predicate};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spheroid-analysis")]
#[command(about = "Debarcoding, quality filters and neighbor statistics for spheroid imaging data")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "SPHEROID_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding `database_path` from the configuration
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema
    Init,
    /// Load CSV exports from a directory
    Ingest {
        dir: PathBuf,
    },
    /// Assign conditions to objects and images from barcode channels
    Debarcode(DebarcodeArgs),
    /// Evaluate and store quality filters
    Filters {
        #[command(subcommand)]
        filter: FilterCommand,
    },
    /// Aggregate neighbor measurements into prefixed measurements
    Neighbors(NeighborArgs),
    /// Per-condition image and object counts
    Summary {
        /// Only count objects with this filter set
        #[arg(long)]
        filter: Option<String>,
    },
}

#[derive(Args, Debug)]
struct DebarcodeArgs {
    /// Candidates lie deeper than this raw distance to the rim
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    borderdist: f64,

    /// Candidates lie at most this deep
    #[arg(long)]
    dist: Option<f64>,

    /// Comma-separated explicit thresholds, one per barcode channel
    #[arg(long, value_delimiter = ',')]
    thresholds: Option<Vec<f64>>,

    /// Compute thresholds per image, site or plate
    #[arg(long)]
    groupby: Option<GroupBy>,
}

#[derive(Subcommand, Debug)]
enum FilterCommand {
    /// Sphere membership (is-sphere)
    Sphere {
        #[arg(long)]
        minfrac: Option<f64>,
        #[arg(long)]
        keep_existing: bool,
    },
    /// Ambiguity against neighboring spheroids (is-ambiguous)
    Ambiguity {
        #[arg(long, allow_negative_numbers = true)]
        floor: Option<f64>,
        #[arg(long)]
        keep_existing: bool,
    },
    /// Sphere and ambiguity, plus the HQ combination
    Hq {
        #[arg(long, default_value = HQ_FILTER)]
        name: String,
        #[arg(long)]
        keep_existing: bool,
    },
}

#[derive(Args, Debug)]
struct NeighborArgs {
    #[arg(long, default_value = "neighbor")]
    relation: String,

    /// Channels to aggregate (repeatable)
    #[arg(long = "channel", required = true)]
    channels: Vec<String>,

    #[arg(long)]
    stack: Option<String>,

    #[arg(long)]
    measurement_name: Option<String>,

    #[arg(long)]
    measurement_type: Option<String>,

    #[arg(long, default_value = "Neighbors_")]
    prefix: String,

    #[arg(long, default_value = "mean")]
    reduce: Reduction,

    /// Only objects with this filter set take part
    #[arg(long)]
    filter: Option<String>,

    /// Keep edges to filtered-out neighbors
    #[arg(long)]
    keep_filtered_neighbors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    init_tracing(&config)?;

    info!(
        "spheroid-analysis v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Database: {}", config.database_path.display());

    let pool = init_database(&config.database_path).await?;
    let store = TabularStore::new(pool);

    match cli.command {
        Command::Init => print_json(&serde_json::json!({
            "database": config.database_path,
            "schema_version": spheroid_common::db::SCHEMA_VERSION,
        })),
        Command::Ingest { dir } => print_json(&ingest::ingest_directory(&store, &dir).await?),
        Command::Debarcode(args) => {
            let mut params = DebarcodeParams::from_config(&config)?;
            params.borderdist = args.borderdist;
            params.dist = args.dist;
            params.groupby = args.groupby;
            if let Some(thresholds) = args.thresholds {
                params.threshold = ThresholdStrategy::Explicit(thresholds);
            }
            let mut debarcoder = Debarcoder::new(store, config.cache_capacity);
            print_json(&debarcoder.run(&params).await?)
        }
        Command::Filters { filter } => run_filters(store, &config, filter).await,
        Command::Neighbors(args) => {
            let selectors = args
                .channels
                .iter()
                .map(|channel| {
                    MeasurementSelector::new()
                        .stack(args.stack.clone().unwrap_or_else(|| config.defaults.stack.clone()))
                        .channel(channel.as_str())
                        .measurement_name(
                            args.measurement_name
                                .clone()
                                .unwrap_or_else(|| config.defaults.measurement_name.clone()),
                        )
                        .measurement_type(
                            args.measurement_type
                                .clone()
                                .unwrap_or_else(|| config.defaults.measurement_type.clone()),
                        )
                })
                .collect();
            let mut request = AggregateRequest::new(args.relation, selectors, args.prefix);
            request.object_type = config.defaults.object_type.clone();
            request.filter = args.filter.map(|name| Predicate::filter(name, true));
            request.drop_filtered_neighbors = !args.keep_filtered_neighbors;

            let reduction = args.reduce;
            let mut aggregator = NeighborAggregator::new(store, config.cache_capacity);
            print_json(&aggregator.aggregate(&request, |values| reduction.apply(values)).await?)
        }
        Command::Summary { filter } => {
            let object_type = config.defaults.object_type.as_deref();
            print_json(&condition_summary(&store, object_type, filter.as_deref()).await?)
        }
    }
}

async fn run_filters(store: TabularStore, config: &Config, command: FilterCommand) -> Result<()> {
    let index = MeasurementIndex::new(store, config.cache_capacity);
    let mut composer = FilterComposer::new(index, config.object_type()?);

    match command {
        FilterCommand::Sphere { minfrac, keep_existing } => {
            let mut params = SphereParams::from_config(config)?;
            if let Some(minfrac) = minfrac {
                params.minfrac = minfrac;
            }
            let table = evaluate_sphere(&mut composer, &params).await?;
            let summary = composer
                .evaluate_and_store(FilterSource::Table(table), SPHERE_FILTER, !keep_existing)
                .await?;
            print_json(&summary)
        }
        FilterCommand::Ambiguity { floor, keep_existing } => {
            let mut params = AmbiguityParams::from_config(config);
            if let Some(floor) = floor {
                params.floor = floor;
            }
            let table = evaluate_ambiguity(&mut composer, &params).await?;
            let summary = composer
                .evaluate_and_store(FilterSource::Table(table), AMBIGUOUS_FILTER, !keep_existing)
                .await?;
            print_json(&summary)
        }
        FilterCommand::Hq { name, keep_existing } => {
            let sphere = SphereParams::from_config(config)?;
            let ambiguity = AmbiguityParams::from_config(config);
            let summary =
                run_quality_filters(&mut composer, &sphere, &ambiguity, Some(name.as_str()), !keep_existing).await?;
            print_json(&summary)
        }
    }
}

/// Subscriber from `RUST_LOG`, falling back to the configured level
fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid logging.level")?;

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
