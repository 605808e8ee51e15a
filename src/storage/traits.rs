//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::ArticleState;
use crate::storage::{ArticleRecord, LinkRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
///
/// Any of these is fatal to the worker that hits it: committed batches stay
/// valid, but nothing further should be written.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store is locked by another process: {0}")]
    Locked(String),

    #[error("Store not found: {0}")]
    NotFound(String),

    #[error("Not a wiki-mapper store: {0}")]
    NotAStore(String),

    #[error("Article not found: {0}")]
    ArticleNotFound(String),

    #[error("Unknown article state in store: {0}")]
    InvalidState(String),

    #[error("Batch error: {0}")]
    Batch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// A store has a single writer. Mutations issued between `begin_batch` and
/// `commit_batch` become durable together; outside a batch each mutation
/// commits on its own.
pub trait Store {
    // ===== Batching =====

    /// Opens a write transaction
    fn begin_batch(&mut self) -> StorageResult<()>;

    /// Commits the open write transaction
    fn commit_batch(&mut self) -> StorageResult<()>;

    /// Discards the open write transaction, if any
    fn rollback_batch(&mut self) -> StorageResult<()>;

    /// Returns true while a batch is open
    fn in_batch(&self) -> bool;

    // ===== Article Management =====

    /// Inserts the article as `Discovered` if unknown, returning the row
    ///
    /// Idempotent: an existing row is returned untouched.
    fn upsert_article(&mut self, title: &str) -> StorageResult<ArticleRecord>;

    /// Inserts the article as `Queued`, or promotes it from `Discovered`
    ///
    /// Articles in any other state are returned untouched.
    fn enqueue(&mut self, title: &str) -> StorageResult<ArticleRecord>;

    /// Gets an article by title
    fn get_article(&self, title: &str) -> StorageResult<Option<ArticleRecord>>;

    /// Marks an article as successfully processed
    ///
    /// Fails with `ArticleNotFound` if the title is unknown.
    fn mark_processed(&mut self, title: &str) -> StorageResult<()>;

    /// Marks an article as permanently failed (processed but without links)
    ///
    /// Fails with `ArticleNotFound` if the title is unknown.
    fn mark_failed(&mut self, title: &str, reason: &str) -> StorageResult<()>;

    /// Records one failed fetch attempt and its error
    fn record_attempt(&mut self, title: &str, error: &str) -> StorageResult<()>;

    /// Returns a claimed (`InProgress`) article to `Queued`
    fn requeue(&mut self, title: &str) -> StorageResult<()>;

    /// Returns a claimed (`InProgress`) article to `Discovered`
    ///
    /// Used when the current shard turns out not to own the title.
    fn disown(&mut self, title: &str) -> StorageResult<()>;

    // ===== Frontier Management =====

    /// Claims the oldest `Queued` article, moving it to `InProgress`
    ///
    /// Articles are returned in discovery order. A claimed article is never
    /// returned again unless it is requeued.
    fn next_queued(&mut self) -> StorageResult<Option<ArticleRecord>>;

    /// Converts every `InProgress` article back to `Queued`
    ///
    /// Called once at worker startup. Returns the number of rows reset.
    fn reset_stale_in_progress(&mut self) -> StorageResult<u64>;

    /// Promotes `Discovered` articles accepted by `owns` to `Queued`
    fn promote_discovered(&mut self, owns: &dyn Fn(&str) -> bool) -> StorageResult<u64>;

    // ===== Link Management =====

    /// Inserts a link, returning true if it was not already present
    fn insert_link(&mut self, from_title: &str, to_title: &str) -> StorageResult<bool>;

    /// Gets the link targets recorded for an article, in insertion order
    fn outgoing_links(&self, from_title: &str) -> StorageResult<Vec<String>>;

    // ===== Streaming & Union (merge support) =====

    /// Streams every article in discovery order, returning the row count
    fn for_each_article(
        &self,
        f: &mut dyn FnMut(ArticleRecord) -> StorageResult<()>,
    ) -> StorageResult<u64>;

    /// Streams every link in insertion order, returning the row count
    fn for_each_link(
        &self,
        f: &mut dyn FnMut(LinkRecord) -> StorageResult<()>,
    ) -> StorageResult<u64>;

    /// Unions an article row from another store into this one
    fn merge_article(&mut self, article: &ArticleRecord) -> StorageResult<()>;

    /// Unions a link row from another store into this one
    fn merge_link(&mut self, link: &LinkRecord) -> StorageResult<()>;

    // ===== Statistics & Progress =====

    /// Gets total article count
    fn count_articles(&self) -> StorageResult<u64>;

    /// Counts articles by state
    fn count_by_state(&self, state: ArticleState) -> StorageResult<u64>;

    /// Counts articles whose processed flag is set
    fn count_processed(&self) -> StorageResult<u64>;

    /// Counts the total number of links
    fn count_links(&self) -> StorageResult<u64>;

    /// Writes a progress marker
    fn set_progress(&mut self, key: &str, value: &str) -> StorageResult<()>;

    /// Reads a progress marker
    fn get_progress(&self, key: &str) -> StorageResult<Option<String>>;

    /// Recomputes the aggregate progress markers from the article and link tables
    fn refresh_progress(&mut self) -> StorageResult<()>;
}
