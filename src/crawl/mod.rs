//! Source-site extraction: listing page → threads → file records.

mod document;
mod normalize;

pub use document::{parse_listing, parse_thread, ScrapedFile, ScrapedTopic};
pub use normalize::{clean_title, extract_size, normalize_link, UNKNOWN_SIZE};

use std::collections::HashSet;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::constants::BROWSER_USER_AGENT;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid base url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("request to {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{0} returned 404")]
    NotFound(String),
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// Fetches the listing page and its threads.
///
/// Threads that answered 404 are remembered for the lifetime of the instance
/// and never requested again.
#[derive(Debug)]
pub struct Crawler {
    client: reqwest::Client,
    file_extension: String,
    broken_threads: HashSet<String>,
}

impl Crawler {
    #[must_use]
    pub fn new(client: reqwest::Client, file_extension: impl Into<String>) -> Self {
        Self {
            client,
            file_extension: file_extension.into(),
            broken_threads: HashSet::new(),
        }
    }

    /// The HTTP client shared with content downloads.
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    #[must_use]
    pub fn file_extension(&self) -> &str {
        &self.file_extension
    }

    /// Whether a thread URL has been marked permanently broken.
    #[must_use]
    pub fn is_broken(&self, thread_url: &str) -> bool {
        self.broken_threads.contains(thread_url)
    }

    /// Run one extraction pass.
    ///
    /// A listing failure yields an empty result. Individual thread failures
    /// are logged and skipped. `limit` of `None` processes every thread.
    pub async fn crawl(&mut self, base_url: &str, limit: Option<usize>) -> Vec<ScrapedTopic> {
        let thread_urls = match self.fetch_listing(base_url).await {
            Ok(urls) => urls,
            Err(e) => {
                error!(base_url = %base_url, "Failed to fetch listing page: {e}");
                return Vec::new();
            }
        };

        let limit = limit.unwrap_or(usize::MAX);
        debug!(found = thread_urls.len(), limit, "Listing parsed");

        let mut topics = Vec::new();
        for thread_url in thread_urls.into_iter().take(limit) {
            if self.is_broken(&thread_url) {
                debug!(topic = %thread_url, "Skipping known broken thread");
                continue;
            }

            match self.fetch_thread(&thread_url).await {
                Ok(topic) if topic.files.is_empty() => {
                    debug!(topic = %thread_url, "Thread has no files");
                }
                Ok(topic) => topics.push(topic),
                Err(CrawlError::NotFound(_)) => {
                    info!(topic = %thread_url, "Skipping 404 thread");
                    self.broken_threads.insert(thread_url);
                }
                Err(e) => {
                    warn!(topic = %thread_url, "Failed to parse thread: {e}");
                }
            }
        }

        topics
    }

    /// Fetch the listing page and return absolute thread URLs.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the page cannot be fetched.
    pub async fn fetch_listing(&self, base_url: &str) -> Result<Vec<String>, CrawlError> {
        let base = Url::parse(base_url).map_err(|source| CrawlError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        let html = self.fetch_text(base.as_str()).await?;
        Ok(parse_listing(&html, &base))
    }

    /// Fetch one thread and extract its files.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::NotFound`] on a 404 and other variants on
    /// transport or status failures.
    pub async fn fetch_thread(&self, thread_url: &str) -> Result<ScrapedTopic, CrawlError> {
        let url = Url::parse(thread_url).map_err(|source| CrawlError::InvalidUrl {
            url: thread_url.to_string(),
            source,
        })?;
        let html = self.fetch_text(url.as_str()).await?;
        Ok(parse_thread(&html, &url, &self.file_extension))
    }

    async fn fetch_text(&self, url: &str) -> Result<String, CrawlError> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", BROWSER_USER_AGENT)
            .send()
            .await
            .map_err(|source| CrawlError::Fetch {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CrawlError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(CrawlError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|source| CrawlError::Fetch {
            url: url.to_string(),
            source,
        })
    }
}
