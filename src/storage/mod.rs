//! Storage module for persisting the article link graph
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Article lifecycle persistence and the crawl frontier
//! - Link (edge) recording
//! - Batched transactions as durability boundaries
//! - Union writes used when merging stores
//!
//! Every store, whether a worker's or a merged one, has the same three
//! tables, so any store can be fed to the merge engine unmodified.

mod schema;
mod sqlite;
mod traits;

pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteStore;
pub use traits::{Store, StorageError, StorageResult};

use crate::state::ArticleState;

use std::path::Path;

/// Opens (or creates) a worker store for exclusive writing
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStore)` - Store opened and locked by this process
/// * `Err(StorageError)` - Failed to open, or another process holds the store
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    SqliteStore::open(path)
}

/// Represents an article row in a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRecord {
    pub id: i64,
    pub title: String,
    pub state: ArticleState,
    pub processed: bool,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub discovered_at: String,
}

/// Represents a directed link between two article titles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub from_title: String,
    pub to_title: String,
    pub discovered_at: String,
}

/// Well-known keys in the progress table
pub mod progress_keys {
    pub const TOTAL_ARTICLES: &str = "total_articles";
    pub const PROCESSED_ARTICLES: &str = "processed_articles";
    pub const REMAINING_ARTICLES: &str = "remaining_articles";
    pub const TOTAL_LINKS: &str = "total_links";
    pub const LAST_ACTIVITY: &str = "last_activity";
    pub const SHARD_INDEX: &str = "shard_index";
    pub const TOTAL_SHARDS: &str = "total_shards";
    pub const CONFIG_HASH: &str = "config_hash";
    pub const LAST_TITLE: &str = "last_title";
    pub const MERGE_SOURCES_DONE: &str = "merge_sources_done";
    pub const MERGE_CURRENT_SOURCE: &str = "merge_current_source";
    pub const MERGE_ROWS_APPLIED: &str = "merge_rows_applied";
}

/// Current time in the fixed-width format used for every stored timestamp
///
/// Fixed width keeps lexical and chronological order identical, which the
/// merge relies on when it keeps the earliest discovery time.
pub(crate) fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
