pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::ScraperConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use self::http_client::HttpClient;

pub use self::parsers::{extract_offers, ExtractError};

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable page source. Retries and timeouts live behind this boundary.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<String> {
        info!("Fetching comparison page {}", url);
        let html = self
            .get_text(url)
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;
        info!("Fetched {} bytes", html.len());
        Ok(html)
    }
}

pub fn http_fetcher(config: &ScraperConfig) -> Result<HttpClient> {
    HttpClient::new(config)
}
