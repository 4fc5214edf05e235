//! Trip segmenter - derives trips from vehicle telemetry
//!
//! Module structure:
//! - `domain/` - Core types (Sample, RawTrip, TripRecord)
//! - `io/` - Telemetry sources and trip sinks
//! - `services/` - Segmentation algorithm, batch driver, trip queries
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use trip_segmenter::domain::VehicleId;
use trip_segmenter::infra::{Config, Metrics};
use trip_segmenter::io::telemetry::parse_timestamp;
use trip_segmenter::io::{
    load_records, JsonlTelemetrySource, JsonlTripSink, MemoryTripSink, TripSink,
};
use trip_segmenter::services::{
    find_trip, summarize, trip_waypoints, BatchRequest, BatchRunner, BatchSummary, TripPipeline,
    TripQuery,
};

/// Trip segmenter - turns noisy vehicle telemetry into discrete trips
#[derive(Parser, Debug)]
#[command(name = "trip-segmenter", version, about)]
struct Cli {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/default.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Segment telemetry into trips and store them
    Run(RunArgs),
    /// Per-vehicle statistics over stored trips
    Stats(StatsArgs),
    /// Recorded route of one stored trip
    Waypoints(WaypointsArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Process samples from this date (YYYY-MM-DD, UTC midnight) or RFC 3339 instant
    #[arg(long, value_parser = parse_since)]
    since: Option<DateTime<Utc>>,

    /// Look-back window in hours when --since is not given
    #[arg(long, default_value_t = 24)]
    hours: i64,

    /// Vehicle to process (repeatable); all active vehicles when omitted
    #[arg(long = "vin")]
    vins: Vec<String>,

    /// Telemetry file, overrides [input] telemetry_file
    #[arg(long)]
    input: Option<String>,

    /// Trip file, overrides [output] trips_file
    #[arg(long)]
    output: Option<String>,

    /// Concurrent vehicle jobs, overrides [batch] workers
    #[arg(long)]
    workers: Option<usize>,

    /// Segment without writing any trips
    #[arg(long)]
    dry_run: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct StatsArgs {
    /// Only this vehicle
    #[arg(long)]
    vin: Option<String>,

    /// Only trips starting at or after this date or instant
    #[arg(long, value_parser = parse_since)]
    since: Option<DateTime<Utc>>,

    /// Trip file, overrides [output] trips_file
    #[arg(long)]
    trips: Option<String>,

    /// Include the individual trips
    #[arg(long)]
    list: bool,
}

#[derive(Args, Debug)]
struct WaypointsArgs {
    #[arg(long)]
    vin: String,

    /// Start timestamp of the stored trip
    #[arg(long, value_parser = parse_since)]
    start: DateTime<Utc>,

    /// Telemetry file, overrides [input] telemetry_file
    #[arg(long)]
    input: Option<String>,

    /// Trip file, overrides [output] trips_file
    #[arg(long)]
    trips: Option<String>,
}

/// Accept a plain date (UTC midnight) or any timestamp the telemetry reader accepts
fn parse_since(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
    }
    parse_timestamp(value).ok_or_else(|| format!("invalid date or timestamp: {value}"))
}

fn init_tracing(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-trip events
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!(git_hash = %env!("GIT_HASH"), "trip-segmenter starting");

    let config_path = Config::resolve_config_path(cli.config.clone());
    let config = Config::load_from_path(&config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;

    match cli.command {
        Commands::Run(args) => run(config, args).await,
        Commands::Stats(args) => stats(config, args),
        Commands::Waypoints(args) => waypoints(config, args),
    }
}

async fn run(config: Config, args: RunArgs) -> Result<ExitCode> {
    let mut config = config;
    if let Some(input) = args.input {
        config = config.with_telemetry_file(input);
    }
    if let Some(output) = args.output {
        config = config.with_trips_file(output);
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    config.validate().context("invalid configuration")?;

    let params = *config.params();
    info!(
        config_file = %config.config_file(),
        telemetry_file = %config.telemetry_file(),
        trips_file = %config.trips_file(),
        workers = %config.workers(),
        start_window_s = %params.start_window_s,
        stop_window_s = %params.stop_window_s,
        silence_timeout_s = %params.silence_timeout_s,
        min_trip_duration_s = %params.min_trip_duration_s,
        min_trip_distance_m = %params.min_trip_distance_m,
        dry_run = %args.dry_run,
        "config_loaded"
    );

    let source = JsonlTelemetrySource::open(config.telemetry_file())
        .with_context(|| format!("failed to open telemetry {}", config.telemetry_file()))?;
    let sink: Arc<dyn TripSink> = if args.dry_run {
        Arc::new(MemoryTripSink::new())
    } else {
        Arc::new(
            JsonlTripSink::open(config.trips_file())
                .with_context(|| format!("failed to open trip file {}", config.trips_file()))?,
        )
    };

    let since = args.since.unwrap_or_else(|| Utc::now() - Duration::hours(args.hours));
    let vehicles = (!args.vins.is_empty())
        .then(|| args.vins.into_iter().map(VehicleId::new).collect::<Vec<_>>());

    let metrics = Arc::new(Metrics::new());
    let runner =
        BatchRunner::new(Arc::new(source), sink, TripPipeline::new(params), metrics.clone())
            .with_workers(config.workers());

    let summary = runner
        .run(BatchRequest { since: Some(since), vehicles })
        .await
        .context("failed to list vehicles")?;
    metrics.report().log();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(if summary.failed > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn print_summary(summary: &BatchSummary) {
    for r in &summary.results {
        let status = match &r.error {
            Some(e) => format!("failed: {e}"),
            None => format!("{:?}", r.status).to_lowercase(),
        };
        println!(
            "{:<20} {:>7} samples  raw {:>3}  kept {:>3}  final {:>3}  inserted {:>3}  {:>6} ms  {}",
            r.vin,
            r.samples,
            r.raw_segments,
            r.filtered_segments,
            r.final_segments,
            r.inserted,
            r.duration_ms,
            status
        );
    }
    println!(
        "{} vehicles: {} successful ({} skipped), {} failed; segments raw {} / filtered {} / final {}; {} inserted; avg {:.1} ms",
        summary.total_vehicles,
        summary.successful,
        summary.skipped,
        summary.failed,
        summary.raw_segments,
        summary.filtered_segments,
        summary.final_segments,
        summary.inserted,
        summary.avg_duration_ms
    );
}

fn stats(config: Config, args: StatsArgs) -> Result<ExitCode> {
    let path = args.trips.unwrap_or_else(|| config.trips_file().to_string());
    let records = load_records(&path).with_context(|| format!("failed to read trips {path}"))?;

    let query = TripQuery { vin: args.vin.map(VehicleId::new), since: args.since };
    let mut stats = summarize(&records, &query);
    if !args.list {
        for s in &mut stats {
            s.trips.clear();
        }
    }

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(ExitCode::SUCCESS)
}

fn waypoints(config: Config, args: WaypointsArgs) -> Result<ExitCode> {
    let trips_path = args.trips.unwrap_or_else(|| config.trips_file().to_string());
    let input_path = args.input.unwrap_or_else(|| config.telemetry_file().to_string());

    let records =
        load_records(&trips_path).with_context(|| format!("failed to read trips {trips_path}"))?;
    let vin = VehicleId::new(args.vin);
    let trip = find_trip(&records, &vin, args.start)?;

    let source = JsonlTelemetrySource::open(&input_path)
        .with_context(|| format!("failed to open telemetry {input_path}"))?;
    let points = trip_waypoints(&source, trip)?;

    info!(vin = %vin, start_ts = %trip.start_ts, waypoints = %points.len(), "waypoints_loaded");
    println!("{}", serde_json::to_string_pretty(&points)?);
    Ok(ExitCode::SUCCESS)
}
