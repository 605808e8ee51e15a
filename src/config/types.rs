use serde::Deserialize;

/// Main configuration structure for a Wiki-Mapper crawl worker
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub shard: ShardConfig,
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    pub storage: StorageConfig,
}

/// Which partition of the title namespace this worker owns
#[derive(Debug, Clone, Deserialize)]
pub struct ShardConfig {
    /// This worker's shard index, in `[0, total)`
    pub index: u32,

    /// Fixed number of shards across all workers
    pub total: u32,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Initial titles to queue (unowned ones are skipped)
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Optional file with one seed title per line
    #[serde(rename = "seed-file", default)]
    pub seed_file: Option<String>,

    /// Minimum time between consecutive fetches (seconds)
    #[serde(rename = "delay-seconds", default = "default_delay_seconds")]
    pub delay_seconds: f64,

    /// Articles processed per committed batch
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: u32,

    /// Upper bound on a single fetch, after which it counts as transient
    #[serde(
        rename = "fetch-timeout-seconds",
        default = "default_fetch_timeout_seconds"
    )]
    pub fetch_timeout_seconds: u64,
}

/// Backoff applied to transient fetch failures
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Upstream content API settings
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Prefix the percent-encoded title is appended to
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
        }
    }
}

/// Store location
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the worker's SQLite store
    #[serde(rename = "database-path")]
    pub database_path: String,
}

fn default_delay_seconds() -> f64 {
    1.0
}

fn default_batch_size() -> u32 {
    100
}

fn default_fetch_timeout_seconds() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_base_url() -> String {
    "https://en.wikipedia.org/api/rest_v1/page/html/".to_string()
}

fn default_user_agent() -> String {
    "WikiMapper/1.0".to_string()
}
