//! Output module for reporting on stores
//!
//! This module handles:
//! - Loading statistics from any store (worker or merged)
//! - Printing them for the `stats` command and at the end of runs
//! - Logging crawl and merge reports

pub mod stats;

pub use stats::{load_statistics, print_statistics, render_statistics, StoreStatistics};

use crate::crawler::CrawlReport;
use crate::merge::MergeReport;

/// Logs a crawl report at info level
pub fn log_crawl_report(report: &CrawlReport) {
    tracing::info!(
        "Crawl finished ({}): {} processed, {} failed, {} retried, {} new links",
        report.stop_reason,
        report.processed,
        report.failed,
        report.retried,
        report.links_written
    );
}

/// Logs store totals at info level
pub fn log_statistics(stats: &StoreStatistics) {
    tracing::info!(
        "Store: {} articles ({} processed, {} remaining), {} links, {:.2} links per processed article",
        stats.total_articles,
        stats.processed_articles,
        stats.remaining_articles(),
        stats.total_links,
        stats.average_links_per_processed()
    );
}

/// Logs a merge report at info level, one line per source
pub fn log_merge_report(report: &MergeReport) {
    for source in &report.sources {
        tracing::info!(
            "  {}: {} articles, {} links",
            source.path.display(),
            source.articles,
            source.links
        );
    }
    tracing::info!(
        "Merge total: {} articles, {} processed, {} links ({} rows read)",
        report.total_articles,
        report.processed_articles,
        report.total_links,
        report.rows_applied
    );
}
