use crate::config::ScraperConfig;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER};
use std::time::Duration;
use tokio_retry::strategy::{jitter, FixedInterval};
use tokio_retry::Retry;
use tracing::{debug, warn};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Delays between attempts. The first attempt is not delayed, so there is one
/// fewer delay than attempts.
fn retry_delays(config: &ScraperConfig) -> impl Iterator<Item = Duration> {
    FixedInterval::from_millis(config.retry_delay_ms)
        .map(jitter)
        .take(config.max_retries.saturating_sub(1) as usize)
}

pub struct HttpClient {
    inner: reqwest::Client,
    config: ScraperConfig,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(
            REFERER,
            HeaderValue::from_str(&config.referer).context("Invalid referer header")?,
        );

        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // ASP.NET pages set a session cookie on first hit
            .cookie_store(true)
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .context("Failed to build HTTP client")?;

        if config.insecure {
            warn!("TLS certificate verification is disabled");
        }

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    async fn get_once(&self, url: &url::Url) -> Result<String> {
        debug!("GET {}", url);
        let resp = self
            .inner
            .get(url.clone())
            .send()
            .await
            .context("Request error")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HTTP error {}", status);
        }

        resp.text().await.context("Failed to read response body")
    }

    /// Fetch a URL as text, making at most `max_retries` attempts in total.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let url = url::Url::parse(url).with_context(|| format!("Invalid URL {:?}", url))?;

        let target = &url;
        Retry::spawn(retry_delays(&self.config), move || async move {
            self.get_once(target).await.inspect_err(|e| {
                warn!("Fetch of {} failed: {:#}", target, e);
            })
        })
        .await
        .with_context(|| format!("All retries exhausted for {}", url))
    }
}
