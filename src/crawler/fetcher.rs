//! Link discovery over HTTP
//!
//! This module defines the capability the crawl engine depends on, plus the
//! implementation backed by the REST content API:
//! - Building HTTP clients with the configured user agent string
//! - Mapping titles to page URLs
//! - Error classification (transient vs. permanent)

use crate::config::FetcherConfig;
use crate::crawler::parser::extract_article_links;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a link fetch
///
/// Transient errors are retried with backoff; permanent ones mark the article
/// failed immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transient fetch error: {0}")]
    Transient(String),

    #[error("permanent fetch error: {0}")]
    Permanent(String),
}

impl FetchError {
    /// Returns true if the failure may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The underlying error description
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Permanent(msg) => msg,
        }
    }
}

/// Turns an article title into its outbound link titles
#[async_trait]
pub trait LinkFetcher: Send + Sync {
    async fn fetch_links(&self, title: &str) -> Result<Vec<String>, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The fetcher configuration (user agent)
/// * `timeout` - Per-request timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &FetcherConfig, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// `LinkFetcher` backed by the REST page-HTML endpoint
#[derive(Debug, Clone)]
pub struct WikipediaFetcher {
    client: Client,
    base_url: String,
}

impl WikipediaFetcher {
    /// Creates a fetcher using `client` against `base_url` (must end in '/')
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Builds a fetcher and its client from configuration
    pub fn from_config(config: &FetcherConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = build_http_client(config, timeout)?;
        Ok(Self::new(client, config.base_url.clone()))
    }

    /// URL of the HTML for `title`
    ///
    /// Spaces become underscores and everything else is percent-encoded,
    /// including '/', which is part of some titles.
    pub fn article_url(&self, title: &str) -> String {
        let encoded = urlencoding::encode(&title.replace(' ', "_")).into_owned();
        format!("{}{}", self.base_url, encoded)
    }
}

#[async_trait]
impl LinkFetcher for WikipediaFetcher {
    async fn fetch_links(&self, title: &str) -> Result<Vec<String>, FetchError> {
        let url = self.article_url(title);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(classify_request_error)?;

        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }

        let body = response.text().await.map_err(classify_request_error)?;
        Ok(extract_article_links(&body))
    }
}

/// Maps a response status to a fetch error, or None on success
///
/// | Status | Class |
/// |--------|-------|
/// | 2xx | success |
/// | 404, 410 | permanent |
/// | 408, 429, 5xx | transient |
/// | anything else | permanent |
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }

    let description = format!("HTTP {}", status.as_u16());

    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Some(FetchError::Permanent(description));
    }

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        return Some(FetchError::Transient(description));
    }

    Some(FetchError::Permanent(description))
}

fn classify_request_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Transient("Request timeout".to_string())
    } else if e.is_connect() {
        FetchError::Transient(format!("Connection failed: {}", e))
    } else if e.is_builder() {
        FetchError::Permanent(format!("Invalid request: {}", e))
    } else {
        FetchError::Transient(e.to_string())
    }
}
