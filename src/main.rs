//! Video-Harvest main entry point
//!
//! This is the command-line interface for the Video-Harvest ingester.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use video_harvest::api::{self, AppState, Bootstrapper};
use video_harvest::config::{load_config_with_hash, validate_query, Config};
use video_harvest::ingest::{ApiKey, CycleOutcome, FetchCycle};
use video_harvest::schedule::Scheduler;
use video_harvest::storage::open_storage;

/// Video-Harvest: a polling ingester for a video-search API
///
/// Video-Harvest polls the search endpoint for every tracked query, walks
/// its continuation tokens, rotates API credentials when quota runs out
/// and serves the stored results through a paginated read API.
#[derive(Parser, Debug)]
#[command(name = "video-harvest")]
#[command(version)]
#[command(about = "A polling ingester for a video-search API", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run a single fetch cycle for QUERY and exit
    #[arg(long, value_name = "QUERY", conflicts_with_all = ["dry_run", "stats"])]
    fetch_once: Option<String>,

    /// Validate config and show what would run without contacting the upstream
    #[arg(long, conflicts_with_all = ["stats", "fetch_once"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "fetch_once"])]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!(path = %cli.config.display(), "Loading configuration");
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!(hash = %config_hash, "Configuration loaded");

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else if let Some(query) = cli.fetch_once.as_deref() {
        handle_fetch_once(&config, query).await?;
    } else {
        handle_serve(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("video_harvest=info,warn"),
            1 => EnvFilter::new("video_harvest=debug,tower_http=debug,info"),
            2 => EnvFilter::new("video_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would run
fn handle_dry_run(config: &Config) {
    println!("=== Video-Harvest Dry Run ===\n");

    println!("Upstream:");
    println!("  Endpoint: {}", config.upstream.base_url);
    println!("  Timeout: {}s", config.upstream.timeout_secs);
    println!("  User agent: {}", config.upstream.user_agent);

    let credentials = config.upstream.credentials();
    println!("\nCredentials ({}):", credentials.len());
    for key in credentials {
        println!("  - {}", ApiKey::new(key));
    }

    println!("\nSchedule:");
    println!("  Interval: {}s", config.schedule.interval_secs);
    println!("  Tick: {}ms", config.schedule.tick_millis);
    println!(
        "  Quota retries: {} ({}ms apart)",
        config.schedule.max_quota_retries, config.schedule.quota_backoff_millis
    );
    println!("  Cycle timeout: {}s", config.schedule.cycle_timeout_secs);

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);

    println!("\nServer:");
    println!("  Bind address: {}", config.server.bind_address);

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would poll \"{}\" and every stored query every {}s",
        config.default_query, config.schedule.interval_secs
    );
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use video_harvest::output::{load_statistics, print_statistics};
    use video_harvest::storage::SqliteStorage;

    println!("Database: {}\n", config.storage.database_path);

    let storage = SqliteStorage::new(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --fetch-once mode: runs exactly one fetch cycle
async fn handle_fetch_once(config: &Config, query: &str) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let cycle = FetchCycle::new(config, storage)?;

    let query = cycle.resolve_query(Some(query));
    validate_query(&query)?;

    match cycle.run(&query).await? {
        CycleOutcome::Ingested(report) => {
            println!("✓ Fetched {} entries for \"{}\"", report.fetched, query);
            println!("  New: {}", report.new_items);
            println!("  Already stored: {}", report.skipped_existing);
            println!("  Malformed: {}", report.malformed);
            if report.failed_inserts > 0 {
                println!("  Failed inserts: {}", report.failed_inserts);
            }
            match report.next_cursor {
                Some(token) => println!("  Next page token: {}", token),
                None => println!("  Caught up (cursor cleared)"),
            }
        }
        CycleOutcome::QuotaExhausted { attempts } => {
            anyhow::bail!("quota exhausted on every credential ({} attempts)", attempts)
        }
        CycleOutcome::UpstreamFailed { error } => anyhow::bail!("upstream failed: {}", error),
        CycleOutcome::TimedOut => anyhow::bail!(
            "fetch cycle timed out after {}s",
            config.schedule.cycle_timeout_secs
        ),
        CycleOutcome::Busy => anyhow::bail!("another fetch for \"{}\" is in progress", query),
    }

    Ok(())
}

/// Handles the default mode: scheduler plus read API until ctrl-c
async fn handle_serve(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config.server.bind_address.parse()?;
    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let cycle = FetchCycle::new(&config, storage)?;

    let created = cycle
        .registrar()
        .ensure_known_queries(&config.default_query)?;
    tracing::info!(created, "Startup registration sweep complete");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(
        cycle.clone(),
        Duration::from_millis(config.schedule.tick_millis),
    );
    let scheduler_task = tokio::spawn(scheduler.run(wait_for_shutdown(shutdown_rx.clone())));

    let state = Arc::new(AppState {
        bootstrapper: Bootstrapper::new(cycle),
    });
    let mut server = tokio::spawn(api::serve(addr, state, wait_for_shutdown(shutdown_rx)));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            tracing::info!("Shutdown requested");
        }
        result = &mut server => {
            let _ = shutdown_tx.send(true);
            scheduler_task.await?;
            result??;
            anyhow::bail!("read API stopped unexpectedly");
        }
    }

    let _ = shutdown_tx.send(true);
    server.await??;
    scheduler_task.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}
