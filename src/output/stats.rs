//! Statistics generation from a store
//!
//! This module provides functionality for extracting and displaying
//! crawl and merge statistics from the storage layer.

use crate::state::ArticleState;
use crate::storage::{progress_keys, Store};
use crate::MapperError;
use std::collections::HashMap;
use std::fmt::Write;

/// Store statistics summary
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStatistics {
    /// Total number of distinct articles
    pub total_articles: u64,

    /// Count of articles by state
    pub articles_by_state: HashMap<ArticleState, u64>,

    /// Articles with the processed flag set (processed or failed)
    pub processed_articles: u64,

    /// Total number of links
    pub total_links: u64,

    /// Shard recorded by the worker that wrote the store, as (index, total)
    pub shard: Option<(String, String)>,

    /// Last recorded activity timestamp
    pub last_activity: Option<String>,
}

impl StoreStatistics {
    /// Articles not yet processed
    pub fn remaining_articles(&self) -> u64 {
        self.total_articles.saturating_sub(self.processed_articles)
    }

    /// Average number of outgoing links per processed article
    pub fn average_links_per_processed(&self) -> f64 {
        if self.processed_articles == 0 {
            return 0.0;
        }
        self.total_links as f64 / self.processed_articles as f64
    }

    /// Count for a single state
    pub fn count(&self, state: ArticleState) -> u64 {
        self.articles_by_state.get(&state).copied().unwrap_or(0)
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The store to query
///
/// # Returns
///
/// * `Ok(StoreStatistics)` - Successfully loaded statistics
/// * `Err(MapperError)` - Failed to query statistics
pub fn load_statistics(store: &dyn Store) -> Result<StoreStatistics, MapperError> {
    let total_articles = store.count_articles()?;
    let processed_articles = store.count_processed()?;
    let total_links = store.count_links()?;

    let mut articles_by_state = HashMap::new();
    for state in ArticleState::all_states() {
        let count = store.count_by_state(state)?;
        if count > 0 {
            articles_by_state.insert(state, count);
        }
    }

    let shard = match (
        store.get_progress(progress_keys::SHARD_INDEX)?,
        store.get_progress(progress_keys::TOTAL_SHARDS)?,
    ) {
        (Some(index), Some(total)) => Some((index, total)),
        _ => None,
    };

    let last_activity = store.get_progress(progress_keys::LAST_ACTIVITY)?;

    Ok(StoreStatistics {
        total_articles,
        articles_by_state,
        processed_articles,
        total_links,
        shard,
        last_activity,
    })
}

/// Formats statistics as a human-readable report
pub fn render_statistics(stats: &StoreStatistics) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "=== Store Statistics ===\n");

    let _ = writeln!(out, "Overview:");
    if let Some((index, total)) = &stats.shard {
        let _ = writeln!(out, "  Shard: {} of {}", index, total);
    }
    let _ = writeln!(out, "  Total articles: {}", stats.total_articles);
    let _ = writeln!(out, "  Processed articles: {}", stats.processed_articles);
    let _ = writeln!(out, "  Remaining articles: {}", stats.remaining_articles());
    let _ = writeln!(out, "  Total links: {}", stats.total_links);
    let _ = writeln!(
        out,
        "  Average links per processed article: {:.2}",
        stats.average_links_per_processed()
    );
    if let Some(last) = &stats.last_activity {
        let _ = writeln!(out, "  Last activity: {}", last);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Articles by State:");
    for state in ArticleState::all_states() {
        let count = stats.count(state);
        let percentage = if stats.total_articles > 0 {
            (count as f64 / stats.total_articles as f64) * 100.0
        } else {
            0.0
        };
        let _ = writeln!(out, "  {}: {} ({:.1}%)", state, count, percentage);
    }

    out
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &StoreStatistics) {
    print!("{}", render_statistics(stats));
}
