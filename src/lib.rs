//! Wiki-Mapper: a sharded, resumable article link graph crawler
//!
//! This crate builds a persisted directed graph of hyperlinks between
//! encyclopedia articles. Independent workers each own a deterministic slice
//! of the title namespace, crawl into their own SQLite store, and the stores
//! are later unioned into one graph by the merge engine.

pub mod config;
pub mod crawler;
pub mod merge;
pub mod output;
pub mod partition;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Wiki-Mapper operations
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Merge error: {0}")]
    Merge(#[from] merge::MergeError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Wiki-Mapper operations
pub type Result<T> = std::result::Result<T, MapperError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlEngine, CrawlReport, FetchError, LinkFetcher};
pub use merge::{merge_stores, MergeOptions, MergeReport};
pub use partition::{assign, ShardAssignment};
pub use state::ArticleState;
pub use storage::{SqliteStore, Store};
