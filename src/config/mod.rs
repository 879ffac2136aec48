use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub storage: StorageConfig,
    pub alerts: AlertsConfig,
    pub report: ReportConfig,
}

/// Comparison page fetching
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_referer")]
    pub referer: String,

    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure: bool,
}

/// Snapshot and alert persistence
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,

    #[serde(default = "default_csv_path")]
    pub csv_path: PathBuf,

    #[serde(default = "default_true")]
    pub write_csv: bool,
}

/// Alert delivery
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AlertsConfig {
    /// Ad-hoc threshold checked on every run, in $/kWh.
    #[serde(default)]
    pub alert_below: Option<f64>,

    /// Recipient for the ad-hoc threshold.
    #[serde(default)]
    pub notify_to: Option<String>,

    /// Relay endpoint; alerts are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Console report
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default = "default_top")]
    pub top: usize,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_url() -> String {
    "https://energychoice.ohio.gov/ApplesToApplesComparision.aspx?Category=Electric&TerritoryId=4&RateCode=1"
        .to_string()
}
fn default_timeout_secs() -> u64 {
    25
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1500
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
        .to_string()
}
fn default_referer() -> String {
    "https://energychoice.ohio.gov/".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/rate_watch.duckdb")
}
fn default_csv_path() -> PathBuf {
    PathBuf::from("apples_to_apples_snapshot.csv")
}
fn default_true() -> bool {
    true
}
fn default_top() -> usize {
    5
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            user_agent: default_user_agent(),
            referer: default_referer(),
            insecure: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
            csv_path: default_csv_path(),
            write_csv: true,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { top: default_top() }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

/// `RATE_WATCH__<SECTION>__<KEY>`: `__` separates the prefix as well as the path.
fn env_source() -> config::Environment {
    config::Environment::with_prefix("RATE_WATCH")
        .separator("__")
        .try_parsing(true)
}

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(env_source())
            .build()?;

        cfg.try_deserialize().context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_sections_fall_back_to_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[scraper]\ninsecure = true\n\n[alerts]\nalert_below = 0.07\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(cfg.scraper.insecure);
        assert_eq!(cfg.scraper.max_retries, 3);
        assert_eq!(cfg.alerts.alert_below, Some(0.07));
        assert_eq!(cfg.alerts.webhook_url, None);
        assert_eq!(cfg.report.top, 5);
        assert!(cfg.storage.write_csv);
    }

    #[test]
    fn test_env_overrides_use_double_underscores() {
        let vars: config::Map<String, String> = [
            ("RATE_WATCH__REPORT__TOP", "9"),
            ("RATE_WATCH__ALERTS__WEBHOOK_URL", "http://localhost:8025/send"),
            ("RATE_WATCH_SCRAPER__TIMEOUT_SECS", "99"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let cfg: AppConfig = config::Config::builder()
            .add_source(env_source().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.report.top, 9);
        assert_eq!(cfg.alerts.webhook_url.as_deref(), Some("http://localhost:8025/send"));
        // Single underscore after the prefix is not picked up
        assert_eq!(cfg.scraper.timeout_secs, 25);
    }
}
