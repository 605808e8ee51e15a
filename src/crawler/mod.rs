//! Crawler module for article link discovery
//!
//! This module contains the core crawling logic, including:
//! - The link-discovery capability and its HTTP implementation
//! - HTML parsing and link extraction
//! - Retry backoff and request pacing
//! - The per-worker crawl loop

mod backoff;
mod engine;
mod fetcher;
mod parser;
mod throttle;

pub use backoff::BackoffPolicy;
pub use engine::{
    open_seed_file, parse_seed_line, CrawlEngine, CrawlReport, CrawlSettings, StopReason,
};
pub use fetcher::{build_http_client, classify_status, FetchError, LinkFetcher, WikipediaFetcher};
pub use parser::extract_article_links;
pub use throttle::RateLimiter;

use crate::config::Config;
use crate::output::{load_statistics, log_statistics};
use crate::storage::open_store;
use std::path::Path;
use tokio::sync::watch;

/// Runs a complete crawl for one worker
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open and lock the worker's store
/// 2. Build the HTTP link fetcher
/// 3. Recover, seed, and rebuild the frontier
/// 4. Crawl until the frontier is empty or `cancel` becomes true
///
/// # Arguments
///
/// * `config` - The validated worker configuration
/// * `config_hash` - Hash of the config file, recorded in the store
/// * `cancel` - Cancellation signal
///
/// # Returns
///
/// * `Ok(CrawlReport)` - Crawl stopped cleanly
/// * `Err(MapperError)` - Startup failed or the store could not be written
pub async fn run_crawl(
    config: &Config,
    config_hash: Option<String>,
    cancel: watch::Receiver<bool>,
) -> crate::Result<CrawlReport> {
    let mut settings = CrawlSettings::from_config(config)?;
    settings.config_hash = config_hash;

    let fetcher = WikipediaFetcher::from_config(&config.fetcher, settings.fetch_timeout)?;

    let mut store = open_store(Path::new(&config.storage.database_path))?;
    tracing::info!("Opened store {}", config.storage.database_path);

    let report = {
        let mut engine =
            CrawlEngine::new(&mut store, fetcher, settings).with_cancellation(cancel);
        engine.run().await?
    };

    let stats = load_statistics(&store)?;
    log_statistics(&stats);

    Ok(report)
}
