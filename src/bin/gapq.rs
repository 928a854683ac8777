//! gapq — run one gapcache query from the command line
//!
//! Loads the configuration and secrets, fetches a rolling window for one
//! host / data source and prints the resulting frames as JSON. With
//! `--repeat`, the query is re-run so the incremental fetch is visible in
//! the log output.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use gapcache::{
    Clock, Config, Coordinator, DataSourceRef, HostRef, InstanceSelection, MetricQuery,
    RestClient, Secrets, SystemClock,
};

/// gapcache query tool
#[derive(Parser)]
#[command(name = "gapq")]
#[command(version = gapcache::version::PKG_VERSION)]
#[command(about = "Run an incremental time-series query")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "GAPCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Host display label
    #[arg(long)]
    host: String,

    /// Device id, skips the host lookup
    #[arg(long)]
    host_id: Option<String>,

    /// Data-source label
    #[arg(long)]
    datasource: String,

    /// Data-source id
    #[arg(long)]
    datasource_id: i64,

    /// Instance labels to select (repeatable)
    #[arg(long = "instance", conflicts_with = "regex")]
    instances: Vec<String>,

    /// Regex over instance names
    #[arg(long)]
    regex: Option<String>,

    /// Data points to render (repeatable; all when omitted)
    #[arg(long = "datapoint")]
    data_points: Vec<String>,

    /// Window length in minutes, ending now
    #[arg(short, long, default_value_t = 60)]
    minutes: i64,

    /// Collect interval in seconds
    #[arg(long, default_value_t = 60)]
    interval: i64,

    /// Backfill data older than the cached window
    #[arg(long)]
    historical: bool,

    /// Run the query this many times
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Seconds to sleep between repeats
    #[arg(long, default_value_t = 60)]
    pause: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // default: warn; override with RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    let secrets = Secrets::load()?;

    tracing::info!(
        version = %gapcache::version::version_string(),
        company = %config.upstream.company,
        "starting gapq"
    );

    let client = RestClient::new(&config.rest_config(), config.credentials(&secrets)?)?;
    let coordinator = Coordinator::builder()
        .source(Arc::new(client))
        .config(config.coordinator_config())
        .retry(config.retry_config())
        .build()?;

    let selection = match args.regex {
        Some(pattern) => InstanceSelection::Regex(pattern),
        None => InstanceSelection::Select(args.instances),
    };
    let mut host = HostRef::new(args.host);
    if let Some(id) = args.host_id {
        host = host.id(id);
    }
    let clock = SystemClock;

    for run in 0..args.repeat.max(1) {
        if run > 0 {
            tokio::time::sleep(Duration::from_secs(args.pause)).await;
        }
        let now = clock.now_secs();
        let query = MetricQuery::new(
            host.clone(),
            DataSourceRef::new(args.datasource.clone(), args.datasource_id),
        )
        .path(config.upstream.company.clone())
        .query_type("raw")
        .selection(selection.clone())
        .data_points(args.data_points.clone())
        .window(now - args.minutes * 60, now)
        .collect_interval(args.interval)
        .historical_data(args.historical);

        let outcome = coordinator.get_data(&query).await?;
        eprintln!(
            "run {}: {} upstream call(s), {} pending, window {}..{}",
            run + 1,
            outcome.api_calls,
            outcome.pending_api_calls,
            outcome.window.start,
            outcome.window.end
        );
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    Ok(())
}
