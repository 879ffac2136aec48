//! Pipeline orchestrator: ties fetcher → extraction → selection → alerts → storage.
//!
//! ## One pass
//!
//!   1. Fetch the comparison page (retries live in the fetcher)
//!   2. Extract offers; a page without an offers table fails the whole pass
//!   3. Select the overall and per-term winners among qualifying offers
//!   4. Persist the snapshot (DuckDB + optional CSV)
//!   5. Match the ad-hoc threshold and every active stored rule against the
//!      per-term winners, record history and notify
//!
//! Steps 2 and 3 are pure. Persistence and notification failures are logged
//! and counted but never abort the pass.

use crate::alerts::{compile_rules, compose_notifications, evaluate, LogNotifier, Notifier, WebhookNotifier};
use crate::config::AppConfig;
use crate::export;
use crate::models::{AlertMatch, AlertRule, Offer, SelectionResult, SkippedRule};
use crate::scraper::{extract_offers, http_fetcher, PageFetcher};
use crate::selection::{qualifies, rank_qualifying, select};
use crate::storage::{Repository, RunCounts, Store};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use std::path::PathBuf;
use tracing::{info, warn};

/// Per-run knobs, resolved from config and CLI flags.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub url: String,
    pub csv_path: Option<PathBuf>,
    pub top: usize,
    pub alert_below: Option<f64>,
    pub notify_to: Option<String>,
}

impl RunOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            url: config.scraper.url.clone(),
            csv_path: config
                .storage
                .write_csv
                .then(|| config.storage.csv_path.clone()),
            top: config.report.top,
            alert_below: config.alerts.alert_below,
            notify_to: config.alerts.notify_to.clone(),
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub snapshot_ts: NaiveDateTime,
    pub url: String,
    pub offers_found: usize,
    pub qualifying: usize,
    pub selection: SelectionResult,
    pub top: Vec<Offer>,
    pub matches: Vec<AlertMatch>,
    pub skipped_rules: Vec<SkippedRule>,
    pub snapshot_rows_saved: usize,
    pub notifications_sent: usize,
    /// Notifications written to the log because no delivery channel is set.
    pub notifications_logged: usize,
    pub errors: usize,
}

impl RunReport {
    fn counts(&self) -> RunCounts {
        RunCounts {
            offers_found: self.offers_found,
            qualifying: self.qualifying,
            alerts_triggered: self.matches.len(),
        }
    }
}

/// The `--alert-below` threshold as an unsaved rule.
fn ad_hoc_rule(threshold: f64, recipient: Option<String>) -> AlertRule {
    AlertRule {
        id: None,
        name: format!("below {}", crate::utils::fmt_price(threshold)),
        price_threshold: threshold,
        term_qualifier: None,
        recipient,
    }
}

pub async fn run_pass<S: Store + ?Sized>(
    fetcher: &dyn PageFetcher,
    store: &S,
    notifier: &dyn Notifier,
    opts: &RunOptions,
) -> Result<RunReport> {
    // ── 1–3. Fetch, extract, select ───────────────────────────────────────────
    let html = fetcher.fetch(&opts.url).await?;
    let offers = extract_offers(&html)?;
    let selection = select(&offers);
    let snapshot_ts = Local::now().naive_local();

    let mut report = RunReport {
        snapshot_ts,
        url: opts.url.clone(),
        offers_found: offers.len(),
        qualifying: offers.iter().filter(|o| qualifies(o)).count(),
        top: rank_qualifying(&offers, opts.top),
        selection,
        matches: Vec::new(),
        skipped_rules: Vec::new(),
        snapshot_rows_saved: 0,
        notifications_sent: 0,
        notifications_logged: 0,
        errors: 0,
    };

    let Some(best) = report.selection.overall.clone() else {
        warn!("No qualifying offers among {} extracted", report.offers_found);
        return Ok(report);
    };

    // ── 4. Persist snapshot ───────────────────────────────────────────────────
    let rows = report.selection.snapshot_rows();
    match store.save_snapshot(snapshot_ts, &opts.url, &rows) {
        Ok(n) => report.snapshot_rows_saved = n,
        Err(e) => {
            warn!("Could not write DB snapshot: {:#}", e);
            report.errors += 1;
        }
    }

    if let Some(path) = &opts.csv_path {
        if let Err(e) = export::append_snapshot(path, &best, snapshot_ts, &opts.url) {
            warn!("Could not write CSV {:?}: {:#}", path, e);
            report.errors += 1;
        }
    }

    // ── 5. Alerts ─────────────────────────────────────────────────────────────
    let mut rules = Vec::new();
    if let Some(threshold) = opts.alert_below {
        rules.push(ad_hoc_rule(threshold, opts.notify_to.clone()));
    }

    match store.active_alert_rules() {
        Ok(records) => {
            let (stored, skipped) = compile_rules(&records);
            rules.extend(stored);
            report.skipped_rules = skipped;
        }
        Err(e) => {
            warn!("Could not load alert rules: {:#}", e);
            report.errors += 1;
        }
    }

    report.matches = evaluate(&rules, &report.selection, snapshot_ts);
    info!("{} rules evaluated, {} matches", rules.len(), report.matches.len());

    for m in &report.matches {
        if let Err(e) = store.record_alert_match(m) {
            warn!("Could not record alert history for '{}': {:#}", m.rule_name, e);
            report.errors += 1;
        }
        if m.recipient.is_none() {
            warn!("Alert '{}' triggered but no recipient is configured", m.rule_name);
        }
    }

    for (name, to, subject, body) in compose_notifications(&report.matches) {
        match notifier.send(&to, &subject, &body).await {
            Ok(()) if notifier.delivers() => {
                info!("Alert sent to {} for '{}'", to, name);
                report.notifications_sent += 1;
            }
            Ok(()) => {
                info!("Alert for '{}' logged only, no delivery channel configured", name);
                report.notifications_logged += 1;
            }
            Err(e) => {
                warn!("Failed to send alert for '{}': {:#}", name, e);
                report.errors += 1;
            }
        }
    }

    Ok(report)
}

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, opts: &RunOptions) -> Result<RunReport> {
        let repo = Repository::open(&self.config.storage.db_path)
            .context("Failed to open DuckDB")?;

        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }

        let fetcher = http_fetcher(&self.config.scraper).context("Failed to build fetcher")?;
        let notifier: Box<dyn Notifier> = match &self.config.alerts.webhook_url {
            Some(url) => Box::new(WebhookNotifier::new(url, self.config.scraper.timeout_secs)?),
            None => Box::new(LogNotifier),
        };

        let run_id = begin_run_log(&repo, &opts.url);
        let result = run_pass(&fetcher, &repo, notifier.as_ref(), opts).await;
        finish_run_log(&repo, run_id, &result);

        result
    }
}

fn begin_run_log(repo: &Repository, url: &str) -> Option<i64> {
    repo.begin_scrape_run(url)
        .inspect_err(|e| warn!("Could not start scrape-run log: {:#}", e))
        .ok()
}

/// Returns whether the run was logged.
fn finish_run_log(repo: &Repository, run_id: Option<i64>, result: &Result<RunReport>) -> bool {
    let Some(run_id) = run_id else { return false };
    let (counts, error) = match result {
        Ok(report) => (report.counts(), None),
        Err(e) => (RunCounts::default(), Some(format!("{:#}", e))),
    };
    match repo.finish_scrape_run(run_id, counts, error.as_deref()) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not finish scrape-run log #{}: {:#}", run_id, e);
            false
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
