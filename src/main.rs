//! Wiki-Mapper main entry point
//!
//! This is the command-line interface for the sharded article link mapper.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use wiki_mapper::config::{load_config_with_hash, validate, Config};
use wiki_mapper::crawler::run_crawl;
use wiki_mapper::merge::{merge_stores, MergeOptions};
use wiki_mapper::output::{load_statistics, log_crawl_report, log_merge_report, print_statistics};
use wiki_mapper::partition::ShardAssignment;
use wiki_mapper::storage::SqliteStore;

/// Wiki-Mapper: a sharded, resumable article link mapper
///
/// Each worker crawls the slice of the title namespace its shard owns into
/// its own SQLite store; `merge` unions the stores into one link graph.
#[derive(Parser, Debug)]
#[command(name = "wiki-mapper")]
#[command(version = "1.0.0")]
#[command(about = "A sharded, resumable article link mapper", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the shard described by a config file
    Crawl(CrawlArgs),

    /// Merge worker stores into one
    Merge(MergeArgs),

    /// Show statistics for a store and exit
    Stats {
        /// Path to the store
        #[arg(value_name = "DB")]
        database: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct CrawlArgs {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Override the shard index
    #[arg(long)]
    shard_index: Option<u32>,

    /// Override the total shard count
    #[arg(long)]
    total_shards: Option<u32>,

    /// Override the store path
    #[arg(long, value_name = "PATH")]
    database: Option<String>,

    /// Override the delay between fetches (seconds)
    #[arg(long, value_name = "SECONDS")]
    delay: Option<f64>,

    /// Override the number of articles per committed batch
    #[arg(long)]
    batch_size: Option<u32>,

    /// Stop cleanly after this many seconds
    #[arg(long, value_name = "SECONDS")]
    stop_after: Option<u64>,

    /// Validate config and show seed ownership without crawling
    #[arg(long)]
    dry_run: bool,
}

#[derive(clap::Args, Debug)]
struct MergeArgs {
    /// Stores to merge, in order
    #[arg(value_name = "INPUTS", required = true)]
    inputs: Vec<PathBuf>,

    /// Merged store to create or extend
    #[arg(short, long, value_name = "PATH")]
    output: PathBuf,

    /// Rows applied between progress checkpoints
    #[arg(long, default_value_t = 1000)]
    checkpoint_every: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Command::Crawl(args) => handle_crawl(args).await,
        Command::Merge(args) => handle_merge(args),
        Command::Stats { database } => handle_stats(&database),
    };

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("wiki_mapper=info,warn"),
            1 => EnvFilter::new("wiki_mapper=debug,info"),
            2 => EnvFilter::new("wiki_mapper=trace,debug"),
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

/// Applies command-line overrides on top of the file configuration
fn apply_overrides(config: &mut Config, args: &CrawlArgs) -> anyhow::Result<()> {
    if let Some(index) = args.shard_index {
        config.shard.index = index;
    }
    if let Some(total) = args.total_shards {
        config.shard.total = total;
    }
    if let Some(database) = &args.database {
        config.storage.database_path = database.clone();
    }
    if let Some(delay) = args.delay {
        config.crawler.delay_seconds = delay;
    }
    if let Some(batch_size) = args.batch_size {
        config.crawler.batch_size = batch_size;
    }

    validate(config).context("invalid command-line override")
}

/// Handles the crawl command
async fn handle_crawl(args: CrawlArgs) -> anyhow::Result<()> {
    tracing::info!("Loading configuration from: {}", args.config.display());
    let (mut config, config_hash) = load_config_with_hash(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    apply_overrides(&mut config, &args)?;

    if args.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);

    let ctrl_c_tx = cancel_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing the current article");
            let _ = ctrl_c_tx.send(true);
        }
    });

    if let Some(seconds) = args.stop_after {
        let timer_tx = cancel_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            tracing::info!("Stop-after window of {}s elapsed, stopping", seconds);
            let _ = timer_tx.send(true);
        });
    }

    let report = run_crawl(&config, Some(config_hash), cancel_rx)
        .await
        .with_context(|| format!("crawl of {} failed", config.storage.database_path))?;

    log_crawl_report(&report);
    Ok(())
}

/// Handles --dry-run: validates config and shows which seeds this shard owns
fn handle_dry_run(config: &Config) {
    println!("=== Wiki-Mapper Dry Run ===\n");

    println!("Shard: {} of {}", config.shard.index, config.shard.total);
    println!("Store: {}", config.storage.database_path);
    println!("Delay: {}s, batch size: {}", config.crawler.delay_seconds, config.crawler.batch_size);
    println!("Fetching from: {}", config.fetcher.base_url);

    let shard = ShardAssignment::new(config.shard.index, config.shard.total);
    println!("\nSeeds ({}):", config.crawler.seeds.len());
    for seed in &config.crawler.seeds {
        let owned = shard.map(|s| s.owns(seed)).unwrap_or(false);
        println!("  {} {}", if owned { "*" } else { "-" }, seed);
    }
    if let Some(seed_file) = &config.crawler.seed_file {
        println!("Seed file: {}", seed_file);
    }

    println!("\n✓ Configuration is valid (* = owned by this shard)");
}

/// Handles the merge command
fn handle_merge(args: MergeArgs) -> anyhow::Result<()> {
    let options = MergeOptions {
        checkpoint_every: args.checkpoint_every,
    };

    let report = merge_stores(&args.inputs, &args.output, &options)
        .with_context(|| format!("merge into {} failed", args.output.display()))?;

    log_merge_report(&report);

    let store = SqliteStore::open_source(&args.output)
        .with_context(|| format!("failed to reopen {}", args.output.display()))?;
    print_statistics(&load_statistics(&store)?);

    Ok(())
}

/// Handles the stats command
fn handle_stats(database: &std::path::Path) -> anyhow::Result<()> {
    println!("Database: {}\n", database.display());

    let store = SqliteStore::open_source(database)
        .with_context(|| format!("failed to open {}", database.display()))?;

    let stats = load_statistics(&store)?;
    print_statistics(&stats);

    Ok(())
}
