//! Aisle-Sweep main entry point
//!
//! This is the command-line interface for the Aisle-Sweep catalog harvester.

use aisle_sweep::config::{load_config_with_hash, Config};
use aisle_sweep::crawler::run_crawl;
use aisle_sweep::output::{load_statistics, print_statistics};
use aisle_sweep::state::{CheckpointStore, JsonCheckpoint};
use aisle_sweep::storage::open_storage;
use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Aisle-Sweep: a checkpointed catalog harvester
///
/// Aisle-Sweep walks every configured store's category tree, appends each
/// product exactly once to a CSV dataset, and resumes interrupted runs from
/// a persisted checkpoint.
#[derive(Parser, Debug)]
#[command(name = "aisle-sweep")]
#[command(version = "1.0.0")]
#[command(about = "A checkpointed catalog harvester", long_about = None)]
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

    /// Discard the checkpoint and start from the first store (the dataset is kept)
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be harvested without harvesting
    #[arg(long, conflicts_with_all = ["stats", "fresh"])]
    dry_run: bool,

    /// Show statistics of the latest run from the ledger and exit
    #[arg(long, conflicts_with_all = ["dry_run", "fresh"])]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(&cli.config, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("aisle_sweep=info,warn"),
            1 => EnvFilter::new("aisle_sweep=debug,info"),
            2 => EnvFilter::new("aisle_sweep=trace,debug"),
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

/// Handles the --dry-run mode: shows the plan and where a run would resume
fn handle_dry_run(config: &Config) {
    println!("=== Aisle-Sweep Dry Run ===\n");

    println!("Crawler Configuration:");
    println!(
        "  429 retries: {} (base delay {}ms, jitter {})",
        config.crawler.max_retries, config.crawler.base_delay_ms, config.crawler.jitter
    );
    println!(
        "  Transient retries: {} (step {}ms)",
        config.crawler.transient_retries, config.crawler.transient_delay_ms
    );
    println!(
        "  Rate-limit rounds per category: {}",
        config.crawler.max_rate_limit_rounds
    );
    println!("  Attempts per store: {}", config.crawler.max_store_attempts);
    println!("  Category pause: {}ms", config.crawler.category_pause_ms);
    println!("  Batch size: {}", config.crawler.batch_size);

    println!("\nAPI:");
    println!("  Base URL: {}", config.api.base_url);
    println!("  Keep-alive: {}", config.api.keep_alive_path);
    println!("  Product widgets: {}", config.api.product_widgets.join(", "));

    println!("\nAuthentication:");
    if let Some(command) = &config.auth.command {
        println!("  Command: {} {}", command, config.auth.args.join(" "));
    } else if let Some(var) = &config.auth.token_env {
        println!("  Token from environment variable {}", var);
    } else {
        println!("  Static token");
    }

    println!("\nOutput:");
    println!("  Dataset: {}", config.output.dataset_path);
    println!("  Checkpoint: {}", config.output.checkpoint_path);
    println!("  Ledger: {}", config.output.ledger_path);

    println!("\nStores ({}):", config.stores.len());
    for (index, store) in config.stores.iter().enumerate() {
        println!("  [{}] {} ({})", index, store.name, store.link);
    }

    let cursor = JsonCheckpoint::new(&config.output.checkpoint_path).load();
    println!("\n✓ Configuration is valid");
    match config.stores.get(cursor.store_index) {
        Some(store) => println!(
            "✓ Would resume at store [{}] {}, category {}{}",
            cursor.store_index,
            store.name,
            cursor.category_index,
            cursor
                .last_emitted_product_id
                .as_deref()
                .map(|id| format!(", after product {}", id))
                .unwrap_or_default()
        ),
        None => println!("✓ Checkpoint is past the last store; nothing left to harvest"),
    }
}

/// Handles the --stats mode: shows statistics from the ledger
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Ledger: {}\n", config.output.ledger_path);

    let storage = open_storage(Path::new(&config.output.ledger_path))
        .context("Failed to open the run ledger")?;

    match load_statistics(&storage)? {
        Some(stats) => print_statistics(&stats),
        None => println!("No runs recorded yet"),
    }

    Ok(())
}

/// Handles the main harvest operation
async fn handle_crawl(config_path: &Path, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh harvest (checkpoint discarded, dataset kept)");
    } else {
        tracing::info!("Starting harvest (resuming from checkpoint if present)");
    }

    let summary = run_crawl(config_path, fresh)
        .await
        .context("Harvest failed")?;

    println!(
        "Harvest finished: {} products emitted, {} stores completed, \
         {} abandoned, {} categories failed",
        summary.products_emitted,
        summary.stores_completed,
        summary.stores_abandoned,
        summary.categories_failed
    );

    Ok(())
}
