//! Configuration module for Wiki-Mapper
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use wiki_mapper::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("worker.toml")).unwrap();
//! println!("Worker owns shard {} of {}", config.shard.index, config.shard.total);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, FetcherConfig, RetryConfig, ShardConfig, StorageConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

pub use validation::validate;
