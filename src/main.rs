//! Sumi-Trawl main entry point
//!
//! This is the command-line interface for the Sumi-Trawl web harvester.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sumi_trawl::config::{load_config_with_hash, Config};
use sumi_trawl::crawler::{serve_requests, Coordinator};
use sumi_trawl::extract::compile_rules;
use sumi_trawl::output::{load_statistics, print_statistics};
use sumi_trawl::storage::{open_storage, AccessStore, QueueStore, RequestStore, SqliteStorage};
use tracing_subscriber::EnvFilter;

/// Database used when neither `--database` nor a configuration names one
const DEFAULT_DATABASE: &str = "./sumi-trawl.db";

/// Sumi-Trawl: a rule-driven web harvester
///
/// Sumi-Trawl crawls the configured seed URLs, extracts structured
/// documents from every page a scraping rule matches, and follows the
/// child URLs those rules point at.
#[derive(Parser, Debug)]
#[command(name = "sumi-trawl")]
#[command(version)]
#[command(about = "A rule-driven web harvester", long_about = None)]
struct Cli {
    /// Path to a TOML or JSON crawl configuration; without it, crawl
    /// requests are served from the database
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Session ID to crawl in (generated when absent)
    #[arg(long, value_name = "ID")]
    session_id: Option<String>,

    /// SQLite database path (overrides `database_path`)
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate the configuration and show the compiled rules without crawling
    #[arg(long, requires = "config", conflicts_with_all = ["enqueue", "stats", "cleanup"])]
    dry_run: bool,

    /// Store a crawl request for CONFIG instead of crawling
    #[arg(long, requires = "config", conflicts_with_all = ["stats", "cleanup"])]
    enqueue: bool,

    /// Show statistics of a session and exit
    #[arg(long, value_name = "SESSION", conflicts_with = "cleanup")]
    stats: Option<String>,

    /// Delete the queued entries and access records of a session and exit
    #[arg(long, value_name = "SESSION")]
    cleanup: Option<String>,

    /// Seconds to wait for a crawl request before exiting
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    idle_timeout: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sumi-trawl: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let loaded = match &cli.config {
        Some(path) => Some(load(path)?),
        None => None,
    };
    let database = database_path(&cli, loaded.as_ref().map(|(config, _)| config));

    if let Some(session_id) = &cli.stats {
        let storage = open(&database)?;
        let index = loaded
            .as_ref()
            .map(|(config, _)| config.index.as_str())
            .unwrap_or("web");
        let stats = load_statistics(&storage, session_id, index)
            .with_context(|| format!("Failed to load statistics of session {}", session_id))?;
        print_statistics(&stats);
        return Ok(());
    }

    if let Some(session_id) = &cli.cleanup {
        let storage = open(&database)?;
        let queued = storage.delete_session_queue(session_id)?;
        let accessed = storage.delete_session_access_records(session_id)?;
        println!(
            "Removed {} queued entries and {} access records of session {}",
            queued, accessed, session_id
        );
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));

    match (loaded, &cli.config) {
        (Some((config, _)), Some(path)) if cli.dry_run => handle_dry_run(&config, path),
        (Some(_), Some(path)) if cli.enqueue => {
            let storage = open(&database)?;
            let absolute = std::fs::canonicalize(path)
                .with_context(|| format!("Failed to resolve {}", path.display()))?;
            let id = storage.enqueue_request(&absolute.to_string_lossy(), cli.session_id.as_deref())?;
            println!("Queued crawl request {} for {}", id, absolute.display());
            Ok(())
        }
        (Some((config, hash)), _) => {
            let storage = Arc::new(open(&database)?);
            let coordinator = Coordinator::new(config, storage, cli.session_id.clone(), hash)?;
            watch_ctrl_c(coordinator.stop_handle());
            let summary = coordinator.run().await?;
            println!(
                "Session {} {}: {} pages, {} documents",
                summary.session_id,
                summary.status.to_db_string(),
                summary.accessed,
                summary.documents
            );
            Ok(())
        }
        _ => {
            let storage = Arc::new(open(&database)?);
            watch_ctrl_c(stop.clone());
            let served =
                serve_requests(storage, Duration::from_secs(cli.idle_timeout), stop).await?;
            tracing::info!("Served {} crawl requests", served);
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_trawl=info,warn"),
            1 => EnvFilter::new("sumi_trawl=debug,info"),
            2 => EnvFilter::new("sumi_trawl=trace,debug"),
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

fn load(path: &Path) -> anyhow::Result<(Config, String)> {
    tracing::info!("Loading configuration from: {}", path.display());
    let (config, hash) = load_config_with_hash(path)
        .with_context(|| format!("Invalid configuration {}", path.display()))?;
    tracing::debug!("Configuration loaded (hash: {})", hash);
    Ok((config, hash))
}

fn database_path(cli: &Cli, config: Option<&Config>) -> PathBuf {
    cli.database
        .clone()
        .or_else(|| config.map(|c| PathBuf::from(&c.database_path)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE))
}

fn open(path: &Path) -> anyhow::Result<SqliteStorage> {
    open_storage(path).with_context(|| format!("Failed to open database {}", path.display()))
}

/// Requests a graceful stop on Ctrl-C
fn watch_ctrl_c(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Stop requested, finishing in-flight pages");
            stop.store(true, Ordering::SeqCst);
        }
    });
}

/// Handles the --dry-run mode: validates config and shows the compiled rules
fn handle_dry_run(config: &Config, path: &Path) -> anyhow::Result<()> {
    let rules = compile_rules(config)?;

    println!("=== Sumi-Trawl Dry Run ===\n");
    println!("Configuration: {} ({})", config.display_name(), path.display());

    println!("\nCrawler:");
    println!("  Workers: {}", config.num_of_thread);
    println!("  Interval: {}ms", config.interval);
    match config.max_depth {
        Some(depth) => println!("  Max depth: {}", depth),
        None => println!("  Max depth: unlimited"),
    }
    match config.max_access_count {
        Some(count) => println!("  Max access count: {}", count),
        None => println!("  Max access count: unlimited"),
    }
    println!("  Incremental: {}", config.incremental);
    println!("  Overwrite: {}", config.overwrite);

    println!("\nOutput:");
    println!("  Database: {}", config.database_path);
    println!("  Index: {}", config.index);

    println!("\nSeeds ({}):", config.urls.len());
    for url in &config.urls {
        println!("  - {}", url);
    }

    println!("\nRules ({}):", rules.len());
    for rule in &rules {
        let fields: Vec<&str> = rule.fields().collect();
        println!("  - {} (matches on {})", rule.name, fields.join(", "));
        for (property, spec) in rule.properties() {
            let source = match &spec.query {
                Some(query) => query.name,
                None if spec.literal.is_some() => "value",
                None if spec.value_type.is_some() => "type",
                None => "script",
            };
            println!("    * {} <- {}", property, source);
        }
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}
