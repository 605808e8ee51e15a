//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Store trait.

use crate::state::ArticleState;
use crate::storage::schema::{has_required_tables, initialize_schema};
use crate::storage::traits::{StorageError, StorageResult, Store};
use crate::storage::{progress_keys, timestamp, ArticleRecord, LinkRecord};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Rows fetched per round trip when scanning for promotable articles
const PROMOTE_CHUNK: i64 = 10_000;

const SELECT_ARTICLE_BY_TITLE: &str = "SELECT id, title, state, processed, attempts, error_message, discovered_at
     FROM articles WHERE title = ?1";

const SELECT_NEXT_QUEUED: &str = "SELECT id, title, state, processed, attempts, error_message, discovered_at
     FROM articles WHERE state = ?1 ORDER BY id LIMIT 1";

const SELECT_ALL_ARTICLES: &str = "SELECT id, title, state, processed, attempts, error_message, discovered_at
     FROM articles ORDER BY id";

/// SQLite storage backend
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
    in_batch: bool,
}

impl SqliteStore {
    /// Opens or creates a store for exclusive writing
    ///
    /// The store stays locked until this value is dropped. A second process
    /// (or a second handle) opening the same file fails fast with
    /// `StorageError::Locked` instead of waiting.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created and locked the store
    /// * `Err(StorageError)` - Failed to open, or the store is busy
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = open_writer(path).map_err(|e| classify_error(e, path))?;

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            in_batch: false,
        })
    }

    /// Opens an existing store as a merge source
    ///
    /// The connection is query-only. Missing files, files that are not
    /// stores, and stores held by a running worker are all reported as errors
    /// naming the path.
    pub fn open_source(path: &Path) -> StorageResult<Self> {
        if !path.is_file() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| classify_error(e, path))?;

        conn.busy_timeout(Duration::ZERO)?;
        conn.execute_batch("PRAGMA query_only = ON;")?;

        let valid = has_required_tables(&conn).map_err(|e| match classify_error(e, path) {
            StorageError::Sqlite(_) => StorageError::NotAStore(path.display().to_string()),
            other => other,
        })?;
        if !valid {
            return Err(StorageError::NotAStore(path.display().to_string()));
        }

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            in_batch: false,
        })
    }

    /// Creates an in-memory store (for tests and dry runs)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            path: None,
            in_batch: false,
        })
    }

    /// Path of the backing file, None for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn require_changed(&self, changed: usize, title: &str) -> StorageResult<()> {
        if changed == 0 {
            return Err(StorageError::ArticleNotFound(title.to_string()));
        }
        Ok(())
    }

    fn set_terminal(&mut self, title: &str, state: ArticleState, reason: Option<&str>) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE articles SET state = ?1, processed = ?2, error_message = ?3, updated_at = ?4
             WHERE title = ?5",
            params![
                state.to_db_string(),
                state.processed_flag(),
                reason,
                timestamp(),
                title
            ],
        )?;
        self.require_changed(changed, title)
    }
}

/// Opens a connection, takes the exclusive lock and ensures the schema
fn open_writer(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::ZERO)?;

    // Exclusive locking must be set before the first WAL access so the
    // wal-index lives in process memory and the file lock is never released.
    conn.execute_batch(
        "
        PRAGMA locking_mode = EXCLUSIVE;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = FULL;
        PRAGMA temp_store = MEMORY;
    ",
    )?;

    initialize_schema(&conn)?;

    // First write acquires the lock for the lifetime of the connection.
    conn.execute(
        "INSERT INTO progress (key, value, updated_at) VALUES ('opened_at', ?1, ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![timestamp()],
    )?;

    Ok(conn)
}

/// Maps busy/locked failures to `StorageError::Locked`
fn classify_error(err: rusqlite::Error, path: &Path) -> StorageError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            StorageError::Locked(path.display().to_string())
        }
        _ => StorageError::Sqlite(err),
    }
}

fn read_article(row: &Row<'_>) -> rusqlite::Result<ArticleRecord> {
    let state_str: String = row.get(2)?;
    let state = ArticleState::from_db_string(&state_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            Box::new(StorageError::InvalidState(state_str.clone())),
        )
    })?;

    Ok(ArticleRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        state,
        processed: row.get(3)?,
        attempts: row.get(4)?,
        error_message: row.get(5)?,
        discovered_at: row.get(6)?,
    })
}

impl Store for SqliteStore {
    // ===== Batching =====

    fn begin_batch(&mut self) -> StorageResult<()> {
        if self.in_batch {
            return Err(StorageError::Batch("a batch is already open".to_string()));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_batch = true;
        Ok(())
    }

    fn commit_batch(&mut self) -> StorageResult<()> {
        if !self.in_batch {
            return Err(StorageError::Batch("no batch is open".to_string()));
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_batch = false;
        Ok(())
    }

    fn rollback_batch(&mut self) -> StorageResult<()> {
        if !self.in_batch {
            return Ok(());
        }
        self.in_batch = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_batch(&self) -> bool {
        self.in_batch
    }

    // ===== Article Management =====

    fn upsert_article(&mut self, title: &str) -> StorageResult<ArticleRecord> {
        let now = timestamp();
        self.conn.execute(
            "INSERT OR IGNORE INTO articles (title, state, processed, discovered_at, updated_at)
             VALUES (?1, ?2, 0, ?3, ?3)",
            params![title, ArticleState::Discovered.to_db_string(), now],
        )?;

        self.get_article(title)?
            .ok_or_else(|| StorageError::ArticleNotFound(title.to_string()))
    }

    fn enqueue(&mut self, title: &str) -> StorageResult<ArticleRecord> {
        let now = timestamp();
        self.conn.execute(
            "INSERT INTO articles (title, state, processed, discovered_at, updated_at)
             VALUES (?1, ?2, 0, ?3, ?3)
             ON CONFLICT(title) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at
             WHERE articles.state = ?4",
            params![
                title,
                ArticleState::Queued.to_db_string(),
                now,
                ArticleState::Discovered.to_db_string()
            ],
        )?;

        self.get_article(title)?
            .ok_or_else(|| StorageError::ArticleNotFound(title.to_string()))
    }

    fn get_article(&self, title: &str) -> StorageResult<Option<ArticleRecord>> {
        let article = self
            .conn
            .query_row(SELECT_ARTICLE_BY_TITLE, params![title], read_article)
            .optional()?;
        Ok(article)
    }

    fn mark_processed(&mut self, title: &str) -> StorageResult<()> {
        self.set_terminal(title, ArticleState::Processed, None)
    }

    fn mark_failed(&mut self, title: &str, reason: &str) -> StorageResult<()> {
        self.set_terminal(title, ArticleState::Failed, Some(reason))
    }

    fn record_attempt(&mut self, title: &str, error: &str) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE articles SET attempts = attempts + 1, error_message = ?1, updated_at = ?2
             WHERE title = ?3",
            params![error, timestamp(), title],
        )?;
        self.require_changed(changed, title)
    }

    fn requeue(&mut self, title: &str) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE articles SET state = ?1, updated_at = ?2 WHERE title = ?3 AND state = ?4",
            params![
                ArticleState::Queued.to_db_string(),
                timestamp(),
                title,
                ArticleState::InProgress.to_db_string()
            ],
        )?;
        Ok(())
    }

    fn disown(&mut self, title: &str) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE articles SET state = ?1, updated_at = ?2 WHERE title = ?3 AND state = ?4",
            params![
                ArticleState::Discovered.to_db_string(),
                timestamp(),
                title,
                ArticleState::InProgress.to_db_string()
            ],
        )?;
        Ok(())
    }

    // ===== Frontier Management =====

    fn next_queued(&mut self) -> StorageResult<Option<ArticleRecord>> {
        let next = self
            .conn
            .query_row(
                SELECT_NEXT_QUEUED,
                params![ArticleState::Queued.to_db_string()],
                read_article,
            )
            .optional()?;

        let Some(mut article) = next else {
            return Ok(None);
        };

        self.conn.execute(
            "UPDATE articles SET state = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                ArticleState::InProgress.to_db_string(),
                timestamp(),
                article.id
            ],
        )?;
        article.state = ArticleState::InProgress;

        Ok(Some(article))
    }

    fn reset_stale_in_progress(&mut self) -> StorageResult<u64> {
        let reset = self.conn.execute(
            "UPDATE articles SET state = ?1, updated_at = ?2 WHERE state = ?3",
            params![
                ArticleState::Queued.to_db_string(),
                timestamp(),
                ArticleState::InProgress.to_db_string()
            ],
        )?;
        Ok(reset as u64)
    }

    fn promote_discovered(&mut self, owns: &dyn Fn(&str) -> bool) -> StorageResult<u64> {
        let now = timestamp();
        let mut last_id = 0i64;
        let mut promoted = 0u64;

        loop {
            let chunk: Vec<(i64, String)> = {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT id, title FROM articles WHERE state = ?1 AND id > ?2 ORDER BY id LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(
                        params![
                            ArticleState::Discovered.to_db_string(),
                            last_id,
                            PROMOTE_CHUNK
                        ],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            let Some((tail_id, _)) = chunk.last() else {
                break;
            };
            last_id = *tail_id;

            for (id, title) in &chunk {
                if owns(title) {
                    promoted += self.conn.execute(
                        "UPDATE articles SET state = ?1, updated_at = ?2 WHERE id = ?3",
                        params![ArticleState::Queued.to_db_string(), now, id],
                    )? as u64;
                }
            }
        }

        Ok(promoted)
    }

    // ===== Link Management =====

    fn insert_link(&mut self, from_title: &str, to_title: &str) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO links (from_title, to_title, discovered_at) VALUES (?1, ?2, ?3)",
            params![from_title, to_title, timestamp()],
        )?;
        Ok(inserted > 0)
    }

    fn outgoing_links(&self, from_title: &str) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT to_title FROM links WHERE from_title = ?1 ORDER BY id")?;

        let links = stmt
            .query_map(params![from_title], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(links)
    }

    // ===== Streaming & Union =====

    fn for_each_article(
        &self,
        f: &mut dyn FnMut(ArticleRecord) -> StorageResult<()>,
    ) -> StorageResult<u64> {
        let mut stmt = self.conn.prepare(SELECT_ALL_ARTICLES)?;
        let mut rows = stmt.query([])?;

        let mut count = 0u64;
        while let Some(row) = rows.next()? {
            f(read_article(row)?)?;
            count += 1;
        }

        Ok(count)
    }

    fn for_each_link(
        &self,
        f: &mut dyn FnMut(LinkRecord) -> StorageResult<()>,
    ) -> StorageResult<u64> {
        let mut stmt = self
            .conn
            .prepare("SELECT from_title, to_title, discovered_at FROM links ORDER BY id")?;
        let mut rows = stmt.query([])?;

        let mut count = 0u64;
        while let Some(row) = rows.next()? {
            f(LinkRecord {
                from_title: row.get(0)?,
                to_title: row.get(1)?,
                discovered_at: row.get(2)?,
            })?;
            count += 1;
        }

        Ok(count)
    }

    fn merge_article(&mut self, incoming: &ArticleRecord) -> StorageResult<()> {
        let incoming_state = incoming.state.for_merge();
        let incoming_processed = incoming.processed || incoming_state.processed_flag();

        let Some(existing) = self.get_article(&incoming.title)? else {
            self.conn.execute(
                "INSERT INTO articles (title, state, processed, discovered_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    incoming.title,
                    incoming_state.to_db_string(),
                    incoming_processed,
                    incoming.discovered_at,
                    timestamp()
                ],
            )?;
            return Ok(());
        };

        let existing_state = existing.state.for_merge();
        let state = if incoming_state.merge_rank() > existing_state.merge_rank() {
            incoming_state
        } else {
            existing_state
        };
        let processed = existing.processed || incoming_processed;
        let discovered_at = std::cmp::min(&existing.discovered_at, &incoming.discovered_at);

        if state == existing.state
            && processed == existing.processed
            && *discovered_at == existing.discovered_at
        {
            return Ok(());
        }

        self.conn.execute(
            "UPDATE articles SET state = ?1, processed = ?2, discovered_at = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                state.to_db_string(),
                processed,
                discovered_at,
                timestamp(),
                existing.id
            ],
        )?;

        Ok(())
    }

    fn merge_link(&mut self, link: &LinkRecord) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO links (from_title, to_title, discovered_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(from_title, to_title)
             DO UPDATE SET discovered_at = MIN(links.discovered_at, excluded.discovered_at)",
            params![link.from_title, link.to_title, link.discovered_at],
        )?;
        Ok(())
    }

    // ===== Statistics & Progress =====

    fn count_articles(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_by_state(&self, state: ArticleState) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE state = ?1",
            params![state.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_processed(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE processed = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_links(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn set_progress(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO progress (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, timestamp()],
        )?;
        Ok(())
    }

    fn get_progress(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM progress WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn refresh_progress(&mut self) -> StorageResult<()> {
        let total = self.count_articles()?;
        let processed = self.count_processed()?;
        let links = self.count_links()?;

        self.set_progress(progress_keys::TOTAL_ARTICLES, &total.to_string())?;
        self.set_progress(progress_keys::PROCESSED_ARTICLES, &processed.to_string())?;
        self.set_progress(
            progress_keys::REMAINING_ARTICLES,
            &total.saturating_sub(processed).to_string(),
        )?;
        self.set_progress(progress_keys::TOTAL_LINKS, &links.to_string())?;
        self.set_progress(progress_keys::LAST_ACTIVITY, &timestamp())?;
        Ok(())
    }
}
