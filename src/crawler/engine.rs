//! Crawl engine - the per-worker crawl loop
//!
//! This module contains the loop that drives one worker's store, including:
//! - Startup recovery (stale claims, seeding, frontier rebuild)
//! - Claiming owned articles in discovery order
//! - Fetching links with rate limiting, timeouts and retry backoff
//! - Persisting results in committed batches
//! - Cooperative cancellation

use crate::config::Config;
use crate::crawler::backoff::BackoffPolicy;
use crate::crawler::fetcher::{FetchError, LinkFetcher};
use crate::crawler::throttle::RateLimiter;
use crate::partition::ShardAssignment;
use crate::storage::{progress_keys, timestamp, StorageResult, Store};
use crate::ConfigError;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::watch;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Everything the engine needs to know about its run
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub shard: ShardAssignment,
    pub seeds: Vec<String>,
    pub seed_file: Option<PathBuf>,
    pub delay: Duration,
    /// Claimed articles per committed batch; each article's state change,
    /// link rows and target rows are committed together
    pub batch_size: u32,
    pub fetch_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub config_hash: Option<String>,
}

impl CrawlSettings {
    /// Builds settings from a validated configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The worker configuration
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlSettings)` - Settings ready for a `CrawlEngine`
    /// * `Err(ConfigError)` - The shard assignment is out of range
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let shard = ShardAssignment::new(config.shard.index, config.shard.total).ok_or_else(|| {
            ConfigError::Validation(format!(
                "shard index {} is out of range for {} shards",
                config.shard.index, config.shard.total
            ))
        })?;

        Ok(Self {
            shard,
            seeds: config.crawler.seeds.clone(),
            seed_file: config.crawler.seed_file.as_ref().map(PathBuf::from),
            delay: Duration::from_secs_f64(config.crawler.delay_seconds.max(0.0)),
            batch_size: config.crawler.batch_size.max(1),
            fetch_timeout: Duration::from_secs(config.crawler.fetch_timeout_seconds),
            backoff: BackoffPolicy::from_config(&config.retry),
            config_hash: None,
        })
    }

    /// Settings for a single-shard worker with no delay, mostly for tests
    pub fn single_shard(seeds: &[&str]) -> Self {
        Self {
            shard: ShardAssignment::single(),
            seeds: seeds.iter().map(|s| s.to_string()).collect(),
            seed_file: None,
            delay: Duration::ZERO,
            batch_size: 100,
            fetch_timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
            config_hash: None,
        }
    }
}

/// Why the crawl loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    /// No owned article is left in `Queued`
    #[default]
    FrontierExhausted,

    /// Cancellation was requested
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FrontierExhausted => write!(f, "frontier exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of one `CrawlEngine::run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Articles whose links were fetched and stored
    pub processed: u64,
    /// Articles marked failed (permanent error or retries exhausted)
    pub failed: u64,
    /// Transient failures that were retried
    pub retried: u64,
    /// New link rows written
    pub links_written: u64,
    /// Owned seed titles inserted or confirmed at startup
    pub seeded: u64,
    /// Stale in-progress claims reset at startup
    pub reset: u64,
    pub stop_reason: StopReason,
}

/// Result of handling one claimed article
enum Outcome {
    Processed { links_written: u64 },
    Failed,
    /// Cancelled before a result was obtained; the article is queued again
    Requeued,
}

/// The crawl loop for one worker and its store
pub struct CrawlEngine<'a, S: Store, F: LinkFetcher> {
    store: &'a mut S,
    fetcher: F,
    settings: CrawlSettings,
    limiter: RateLimiter,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a, S: Store, F: LinkFetcher> CrawlEngine<'a, S, F> {
    /// Creates a new engine over `store`
    ///
    /// # Arguments
    ///
    /// * `store` - The worker's store, exclusively borrowed for the run
    /// * `fetcher` - The link-discovery capability
    /// * `settings` - Shard, seeds, pacing and retry policy
    pub fn new(store: &'a mut S, fetcher: F, settings: CrawlSettings) -> Self {
        let limiter = RateLimiter::new(settings.delay);
        Self {
            store,
            fetcher,
            settings,
            limiter,
            cancel: None,
        }
    }

    /// Stops the loop at the next safe point once `cancel` holds `true`
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Runs the crawl until the frontier is empty or cancellation is requested
    ///
    /// Storage errors roll back the open batch and end the run; everything
    /// committed before stays valid. Fetch errors never escape this method.
    pub async fn run(&mut self) -> crate::Result<CrawlReport> {
        let result = self.run_inner().await;

        if result.is_err() && self.store.in_batch() {
            if let Err(e) = self.store.rollback_batch() {
                tracing::error!("Failed to roll back open batch: {}", e);
            }
        }

        result
    }

    async fn run_inner(&mut self) -> crate::Result<CrawlReport> {
        let mut report = CrawlReport::default();
        self.prepare(&mut report)?;

        tracing::info!("Starting crawl for {}", self.settings.shard);

        let start_time = Instant::now();
        let mut batch_count = 0u32;
        let mut last_title: Option<String> = None;

        self.store.begin_batch()?;

        let stop_reason = loop {
            if self.is_cancelled() {
                break StopReason::Cancelled;
            }

            let Some(article) = self.store.next_queued()? else {
                break StopReason::FrontierExhausted;
            };

            if !self.settings.shard.owns(&article.title) {
                tracing::warn!(
                    "Queued article '{}' is not owned by {}; leaving it as discovered",
                    article.title,
                    self.settings.shard
                );
                self.store.disown(&article.title)?;
                continue;
            }

            tracing::debug!("Processing article: {}", article.title);

            match self.process_article(&article.title, &mut report).await? {
                Outcome::Processed { links_written } => {
                    report.processed += 1;
                    report.links_written += links_written;
                }
                Outcome::Failed => report.failed += 1,
                Outcome::Requeued => break StopReason::Cancelled,
            }

            batch_count += 1;
            last_title = Some(article.title);

            if batch_count >= self.settings.batch_size {
                self.checkpoint(last_title.as_deref())?;
                self.store.begin_batch()?;
                batch_count = 0;

                let elapsed = start_time.elapsed().as_secs_f64();
                let done = report.processed + report.failed;
                tracing::info!(
                    "Progress: {} processed, {} failed, {} links, {:.2} articles/sec",
                    report.processed,
                    report.failed,
                    report.links_written,
                    if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 }
                );
            }
        };

        self.checkpoint(last_title.as_deref())?;
        self.store.refresh_progress()?;

        report.stop_reason = stop_reason;
        tracing::info!(
            "Crawl stopped ({}): {} processed, {} failed, {} retries, {} links in {:?}",
            stop_reason,
            report.processed,
            report.failed,
            report.retried,
            report.links_written,
            start_time.elapsed()
        );

        Ok(report)
    }

    /// Startup: recover stale claims, seed, and rebuild the owned frontier
    fn prepare(&mut self, report: &mut CrawlReport) -> crate::Result<()> {
        report.reset = self.store.reset_stale_in_progress()?;
        if report.reset > 0 {
            tracing::info!(
                "Reset {} article(s) left in progress by a previous run",
                report.reset
            );
        }

        self.store.begin_batch()?;

        let shard = self.settings.shard;
        self.store
            .set_progress(progress_keys::SHARD_INDEX, &shard.index().to_string())?;
        self.store
            .set_progress(progress_keys::TOTAL_SHARDS, &shard.total().to_string())?;
        if let Some(hash) = &self.settings.config_hash {
            self.store.set_progress(progress_keys::CONFIG_HASH, hash)?;
        }

        report.seeded = self.seed()?;

        let promoted = self
            .store
            .promote_discovered(&move |title: &str| shard.owns(title))?;
        if promoted > 0 {
            tracing::info!("Queued {} owned article(s) found as discovered", promoted);
        }

        self.store.commit_batch()?;
        self.store.refresh_progress()?;
        Ok(())
    }

    /// Queues every owned seed title, returning how many were owned
    fn seed(&mut self) -> crate::Result<u64> {
        let shard = self.settings.shard;
        let mut owned = 0u64;
        let mut skipped = 0u64;

        let seeds = self.settings.seeds.clone();
        for title in &seeds {
            if shard.owns(title) {
                self.store.enqueue(title)?;
                owned += 1;
            } else {
                tracing::info!("Seed '{}' belongs to another shard, skipping", title);
                skipped += 1;
            }
        }

        if let Some(path) = self.settings.seed_file.clone() {
            let (file_owned, file_skipped) = self.seed_from_file(&path)?;
            tracing::info!(
                "Seed file {}: {} owned title(s), {} belonging to other shards",
                path.display(),
                file_owned,
                file_skipped
            );
            owned += file_owned;
            skipped += file_skipped;
        }

        tracing::debug!("Seeding done: {} owned, {} skipped", owned, skipped);
        Ok(owned)
    }

    fn seed_from_file(&mut self, path: &Path) -> crate::Result<(u64, u64)> {
        let reader = open_seed_file(path)?;
        let shard = self.settings.shard;
        let mut owned = 0u64;
        let mut skipped = 0u64;

        for line in reader.lines() {
            let line = line?;
            let Some(title) = parse_seed_line(&line) else {
                continue;
            };

            if shard.owns(&title) {
                self.store.enqueue(&title)?;
                owned += 1;
            } else {
                skipped += 1;
            }
        }

        Ok((owned, skipped))
    }

    /// Fetches one claimed article and records the outcome
    async fn process_article(
        &mut self,
        title: &str,
        report: &mut CrawlReport,
    ) -> StorageResult<Outcome> {
        let mut attempts = 0u32;

        loop {
            if !self.wait_for_rate_limit().await {
                self.store.requeue(title)?;
                return Ok(Outcome::Requeued);
            }

            attempts += 1;
            self.limiter.record_request(Instant::now());

            match self.fetch(title).await {
                Ok(links) => {
                    let links_written = self.record_links(title, &links)?;
                    self.store.mark_processed(title)?;
                    tracing::debug!(
                        "Processed '{}': {} link(s), {} new",
                        title,
                        links.len(),
                        links_written
                    );
                    return Ok(Outcome::Processed { links_written });
                }

                Err(FetchError::Permanent(reason)) => {
                    tracing::warn!("Permanent failure for '{}': {}", title, reason);
                    self.store.mark_failed(title, &reason)?;
                    return Ok(Outcome::Failed);
                }

                Err(FetchError::Transient(reason)) => {
                    self.store.record_attempt(title, &reason)?;

                    if !self.settings.backoff.should_retry(attempts) {
                        tracing::warn!(
                            "Giving up on '{}' after {} attempt(s): {}",
                            title,
                            attempts,
                            reason
                        );
                        let message = format!("retries exhausted after {} attempts: {}", attempts, reason);
                        self.store.mark_failed(title, &message)?;
                        return Ok(Outcome::Failed);
                    }

                    let delay = self.settings.backoff.delay_for(attempts);
                    report.retried += 1;
                    tracing::warn!(
                        "Transient failure for '{}' (attempt {}): {}; retrying in {:?}",
                        title,
                        attempts,
                        reason,
                        delay
                    );

                    if !self.sleep_or_cancel(delay).await {
                        self.store.requeue(title)?;
                        return Ok(Outcome::Requeued);
                    }
                }
            }
        }
    }

    /// Calls the fetcher, converting a timeout into a transient failure
    async fn fetch(&self, title: &str) -> Result<Vec<String>, FetchError> {
        match tokio::time::timeout(self.settings.fetch_timeout, self.fetcher.fetch_links(title)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transient(format!(
                "fetch timed out after {:?}",
                self.settings.fetch_timeout
            ))),
        }
    }

    /// Writes the links of `from` and registers their targets
    ///
    /// Owned targets are queued; the rest are recorded as discovered so the
    /// merged graph knows about them.
    fn record_links(&mut self, from: &str, links: &[String]) -> StorageResult<u64> {
        let mut written = 0u64;

        for to in links {
            if self.store.insert_link(from, to)? {
                written += 1;
            }

            if self.settings.shard.owns(to) {
                self.store.enqueue(to)?;
            } else {
                self.store.upsert_article(to)?;
            }
        }

        Ok(written)
    }

    /// Commits the open batch together with the progress markers
    fn checkpoint(&mut self, last_title: Option<&str>) -> StorageResult<()> {
        if let Some(title) = last_title {
            self.store.set_progress(progress_keys::LAST_TITLE, title)?;
        }
        self.store
            .set_progress(progress_keys::LAST_ACTIVITY, &timestamp())?;
        self.store.commit_batch()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Waits out the inter-fetch delay; false if cancelled meanwhile
    async fn wait_for_rate_limit(&mut self) -> bool {
        match self.limiter.time_until_next_request(Instant::now()) {
            Some(wait) => self.sleep_or_cancel(wait).await,
            None => !self.is_cancelled(),
        }
    }

    /// Sleeps for `duration`, returning false early if cancellation is requested
    async fn sleep_or_cancel(&mut self, duration: Duration) -> bool {
        let Some(rx) = self.cancel.as_mut() else {
            tokio::time::sleep(duration).await;
            return true;
        };

        let deadline = tokio::time::Instant::now() + duration;
        loop {
            if *rx.borrow() {
                return false;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can cancel any more
                        tokio::time::sleep_until(deadline).await;
                        return true;
                    }
                }
            }
        }
    }
}

/// Opens a seed file, decompressing it if it is gzip
///
/// Gzip is detected from the magic bytes, so the upstream `*.gz` title dump
/// can be used as downloaded.
pub fn open_seed_file(path: &Path) -> std::io::Result<Box<dyn BufRead>> {
    let mut reader = BufReader::new(File::open(path)?);
    let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);

    if is_gzip {
        tracing::debug!("Seed file {} is gzip-compressed", path.display());
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Normalizes one line of a seed file into a title
///
/// Blank lines and `#` comments yield None; underscores become spaces.
///
/// # Example
///
/// ```
/// use wiki_mapper::crawler::parse_seed_line;
///
/// assert_eq!(parse_seed_line("Alan_Turing"), Some("Alan Turing".to_string()));
/// assert_eq!(parse_seed_line("# comment"), None);
/// ```
pub fn parse_seed_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(line.replace('_', " "))
}
