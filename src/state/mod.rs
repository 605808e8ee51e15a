//! State module for tracking crawl progress
//!
//! This module defines the lifecycle an article goes through inside one
//! worker's store, from first discovery to a terminal outcome.

mod article_state;

pub use article_state::ArticleState;
