//! Hashtag-Crawler main entry point
//!
//! This is the command-line interface for the hashtag/URL alignment crawler.

use anyhow::Context;
use clap::Parser;
use hashtag_crawler::config::{load_config_with_hash, Config};
use hashtag_crawler::crawler::run_crawl;
use hashtag_crawler::output::{generate_report, load_statistics, print_report, print_statistics};
use hashtag_crawler::source::scan_input_files;
use hashtag_crawler::storage::SqliteStorage;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Hashtag-Crawler: hashtag/URL alignment under an API quota
///
/// Reads dumps of social-media posts, resolves every linked URL through a
/// rate-limited batch query service, and stores which hashtags were used
/// with which final pages.
#[derive(Parser, Debug)]
#[command(name = "hashtag-crawler")]
#[command(version)]
#[command(about = "Aligns hashtags with the pages their posts link to", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Directory scanned for dump files, overrides the configured one
    #[arg(short, long, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and list the dump files without crawling
    #[arg(long, conflicts_with_all = ["stats", "report"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "report"])]
    stats: bool,

    /// Show a report on the latest run and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    report: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config, cli.input.as_deref())
    } else if cli.stats {
        handle_stats(&config)
    } else if cli.report {
        handle_report(&config)
    } else {
        handle_crawl(config, &config_hash, cli.input.as_deref()).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("hashtag_crawler=info,warn"),
            1 => EnvFilter::new("hashtag_crawler=debug,info"),
            2 => EnvFilter::new("hashtag_crawler=trace,debug"),
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

fn input_directory(config: &Config, input: Option<&Path>) -> PathBuf {
    input
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.input.directory))
}

/// Handles the --dry-run mode: validates config and lists the dump files
fn handle_dry_run(config: &Config, input: Option<&Path>) -> anyhow::Result<()> {
    println!("=== Hashtag-Crawler Dry Run ===\n");

    println!("Scheduler:");
    println!("  Hourly quota: {}", config.scheduler.hourly_quota);
    println!("  Tick period: {:?}", config.scheduler.tick_period());

    println!("\nCrawler:");
    println!("  Chunk size: {}", config.crawler.chunk_size);
    println!(
        "  Backpressure threshold: {}",
        config.crawler.backpressure_threshold()
    );
    println!("  Request timeout: {:?}", config.crawler.request_timeout());
    println!("  Shutdown grace: {:?}", config.crawler.shutdown_grace());

    println!("\nRedirect Cache:");
    println!("  Capacity: {}", config.cache.capacity);
    println!("  Check persisted on miss: {}", config.cache.check_persisted);

    println!("\nRemote:");
    println!("  Endpoint: {}", config.remote.endpoint);
    println!("  Table: {}", config.remote.table_name);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\nSpam Hashtags ({}):", config.spam.hashtags.len());
    for hashtag in &config.spam.hashtags {
        println!("  - {}", hashtag);
    }

    let directory = input_directory(config, input);
    let files = scan_input_files(&directory, &config.input.file_pattern)
        .with_context(|| format!("Failed to scan {}", directory.display()))?;
    println!("\nDump Files ({}):", files.len());
    for file in &files {
        println!("  - {}", file.display());
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --report mode: shows the latest run
fn handle_report(config: &Config) -> anyhow::Result<()> {
    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let report = generate_report(&storage)?;
    print_report(&report);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str, input: Option<&Path>) -> anyhow::Result<()> {
    tracing::info!(
        "Hourly quota: {}, chunk size: {}, spam hashtags: {}",
        config.scheduler.hourly_quota,
        config.crawler.chunk_size,
        config.spam.hashtags.len()
    );

    match run_crawl(config, config_hash, input).await {
        Ok(summary) if summary.drained => {
            tracing::info!("Crawl completed successfully");
            Ok(())
        }
        Ok(summary) => {
            tracing::warn!(
                "Crawl interrupted with {} candidates left",
                summary.abandoned_candidates
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
