//! Raw HTML retrieval for recipe pages.

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Hard limit on a single page fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("The site did not respond within {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Could not connect to the site: {0}")]
    Connection(String),

    #[error("The site responded with HTTP {0}")]
    Status(u16),

    #[error("The site returned an empty page")]
    EmptyBody,

    #[error("Failed to download the page: {0}")]
    Request(String),
}

impl FetchError {
    /// True when the site refused to serve the page to us.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::Status(401 | 403 | 429))
    }
}

/// Source of raw page HTML.
#[async_trait]
pub trait HtmlFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Fetcher presenting itself as a regular desktop browser.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_timeout(FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("pl-PL,pl;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(
            header::UPGRADE_INSECURE_REQUESTS,
            HeaderValue::from_static("1"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create page fetch client: {}", e))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl HtmlFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        debug!("Fetching page: {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else if e.is_connect() {
                FetchError::Connection(e.to_string())
            } else {
                FetchError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Page fetch for {} returned {}", url, status);
            return Err(FetchError::Status(status.as_u16()));
        }

        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Request(e.to_string())
            }
        })?;

        if html.trim().is_empty() {
            return Err(FetchError::EmptyBody);
        }

        info!("Fetched {} ({} bytes)", url, html.len());
        Ok(html)
    }
}
