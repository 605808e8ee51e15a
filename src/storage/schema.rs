//! Database schema definitions
//!
//! This module contains all SQL schema definitions for Wiki-Mapper stores.

/// Version stamped into `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Every title ever seen, as crawl target or link destination
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL UNIQUE,
    state TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    discovered_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_articles_state ON articles(state, id);

-- Directed edges between titles
CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_title TEXT NOT NULL,
    to_title TEXT NOT NULL,
    discovered_at TEXT NOT NULL,
    UNIQUE(from_title, to_title)
);

CREATE INDEX IF NOT EXISTS idx_links_to ON links(to_title);

-- Observability only; always recomputable from the tables above
CREATE TABLE IF NOT EXISTS progress (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Tables every store must contain
pub const REQUIRED_TABLES: [&str; 3] = ["articles", "links", "progress"];

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Returns true if all required tables exist
pub fn has_required_tables(conn: &rusqlite::Connection) -> Result<bool, rusqlite::Error> {
    for table in REQUIRED_TABLES {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        if count != 1 {
            return Ok(false);
        }
    }
    Ok(true)
}
