use crate::alerts::term::parse_term_expression;
use crate::models::{AlertHistoryEntry, AlertMatch, AlertRuleRecord, SnapshotRow};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use duckdb::{params, Connection, OptionalExt, Row};
use std::path::Path;
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_offers START 1;
CREATE SEQUENCE IF NOT EXISTS seq_alerts START 1;
CREATE SEQUENCE IF NOT EXISTS seq_alert_history START 1;
CREATE SEQUENCE IF NOT EXISTS seq_scrape_runs START 1;

CREATE TABLE IF NOT EXISTS offers (
    id                      BIGINT PRIMARY KEY DEFAULT nextval('seq_offers'),
    snapshot_ts             TIMESTAMP NOT NULL,
    selection_type          VARCHAR   NOT NULL,
    supplier                VARCHAR   NOT NULL,
    price_dollars_per_kwh   DOUBLE    NOT NULL,
    rate_type               VARCHAR,
    term_months             INTEGER,
    -- Display text as scraped, plus the parsed amount (NULL = placeholder or unreadable)
    etf                     VARCHAR,
    etf_amount              DOUBLE,
    monthly_fee             VARCHAR,
    monthly_fee_amount      DOUBLE,
    renewable               VARCHAR,
    promo                   VARCHAR,
    intro_price             VARCHAR,
    url                     VARCHAR
);

CREATE TABLE IF NOT EXISTS alerts (
    id              BIGINT PRIMARY KEY DEFAULT nextval('seq_alerts'),
    name            VARCHAR   NOT NULL,
    threshold       DOUBLE    NOT NULL,
    term_qualifier  VARCHAR,
    email_to        VARCHAR   NOT NULL,
    active          BOOLEAN   NOT NULL DEFAULT TRUE,
    created_at      TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_history (
    id              BIGINT PRIMARY KEY DEFAULT nextval('seq_alert_history'),
    alert_id        BIGINT    NOT NULL,
    triggered_at    TIMESTAMP NOT NULL,
    price           DOUBLE    NOT NULL,
    term_months     INTEGER,
    supplier        VARCHAR,
    message         VARCHAR
);

CREATE TABLE IF NOT EXISTS scrape_runs (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('seq_scrape_runs'),
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP,
    status              VARCHAR NOT NULL DEFAULT 'running',
    url                 VARCHAR,
    offers_found        INTEGER DEFAULT 0,
    qualifying          INTEGER DEFAULT 0,
    alerts_triggered    INTEGER DEFAULT 0,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_offers_snapshot ON offers (snapshot_ts);
CREATE INDEX IF NOT EXISTS idx_history_alert   ON alert_history (alert_id);
"#;

// ── Store trait ───────────────────────────────────────────────────────────────

/// Persistence boundary for a run: offer snapshots in, active rules out,
/// alert history in.
pub trait Store {
    fn save_snapshot(&self, snapshot_ts: NaiveDateTime, url: &str, rows: &[SnapshotRow]) -> Result<usize>;
    fn active_alert_rules(&self) -> Result<Vec<AlertRuleRecord>>;
    fn record_alert_match(&self, m: &AlertMatch) -> Result<()>;
}

/// Counters written to `scrape_runs` when a run ends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunCounts {
    pub offers_found: usize,
    pub qualifying: usize,
    pub alerts_triggered: usize,
}

fn alert_from_row(r: &Row<'_>) -> duckdb::Result<AlertRuleRecord> {
    Ok(AlertRuleRecord {
        id: r.get(0)?,
        name: r.get(1)?,
        price_threshold: r.get(2)?,
        term_qualifier: r.get(3)?,
        recipient: r.get(4)?,
        active: r.get(5)?,
        created_at: r.get(6)?,
    })
}

fn term_from_db(v: Option<i64>) -> Option<u32> {
    v.and_then(|t| u32::try_from(t).ok())
}

/// Local wall time, the same clock snapshots and history are stamped with.
fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

const ALERT_COLUMNS: &str = "id, name, threshold, term_qualifier, email_to, active, created_at";

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![now()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Alerts ────────────────────────────────────────────────────────────────

    /// Insert a rule. The threshold and term qualifier are validated first so
    /// only usable rules are ever stored.
    pub fn create_alert(
        &self,
        name: &str,
        threshold: f64,
        term_qualifier: Option<&str>,
        email_to: &str,
        active: bool,
    ) -> Result<i64> {
        let name = name.trim();
        let email_to = email_to.trim();
        if name.is_empty() || email_to.is_empty() {
            anyhow::bail!("Name, threshold, and email are required.");
        }
        if !threshold.is_finite() || threshold <= 0.0 {
            anyhow::bail!("Threshold must be a positive number, got {}", threshold);
        }
        let term_qualifier = term_qualifier.map(str::trim).filter(|t| !t.is_empty());
        if let Some(expr) = term_qualifier {
            parse_term_expression(expr)?;
        }

        let id: i64 = self.conn.query_row(
            "INSERT INTO alerts (name, threshold, term_qualifier, email_to, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
            params![name, threshold, term_qualifier, email_to, active, now()],
            |r| r.get(0),
        )?;
        info!("Created alert #{} '{}'", id, name);
        Ok(id)
    }

    pub fn list_alerts(&self) -> Result<Vec<AlertRuleRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ALERT_COLUMNS} FROM alerts ORDER BY id DESC"))?;
        let alerts = stmt
            .query_map([], alert_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(alerts)
    }

    /// Flip a rule's active flag. Returns the new state, or `None` if no such rule.
    pub fn toggle_alert(&self, id: i64) -> Result<Option<bool>> {
        let active: Option<bool> = self
            .conn
            .query_row("SELECT active FROM alerts WHERE id = ?", params![id], |r| r.get(0))
            .optional()?;
        let Some(active) = active else { return Ok(None) };

        self.conn
            .execute("UPDATE alerts SET active = ? WHERE id = ?", params![!active, id])?;
        Ok(Some(!active))
    }

    /// Delete a rule together with its history.
    pub fn delete_alert(&self, id: i64) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM alert_history WHERE alert_id = ?", params![id])?;
        let n = tx.execute("DELETE FROM alerts WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(n > 0)
    }

    /// Newest first, optionally for one rule.
    pub fn alert_history(&self, alert_id: Option<i64>, limit: usize) -> Result<Vec<AlertHistoryEntry>> {
        let filter = if alert_id.is_some() { "WHERE h.alert_id = ?" } else { "" };
        let sql = format!(
            r#"SELECT h.id, h.alert_id, a.name, a.email_to, h.triggered_at,
                      h.price, h.term_months, h.supplier, h.message
               FROM alert_history h
               JOIN alerts a ON a.id = h.alert_id
               {filter}
               ORDER BY h.triggered_at DESC, h.id DESC
               LIMIT {limit}"#
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let map = |r: &Row<'_>| -> duckdb::Result<AlertHistoryEntry> {
            Ok(AlertHistoryEntry {
                id: r.get(0)?,
                alert_id: r.get(1)?,
                alert_name: r.get(2)?,
                recipient: r.get(3)?,
                triggered_at: r.get(4)?,
                price: r.get(5)?,
                term_months: term_from_db(r.get(6)?),
                supplier: r.get(7)?,
                message: r.get(8)?,
            })
        };
        let rows = match alert_id {
            Some(id) => stmt.query_map(params![id], map)?.collect::<duckdb::Result<Vec<_>>>()?,
            None => stmt.query_map([], map)?.collect::<duckdb::Result<Vec<_>>>()?,
        };
        Ok(rows)
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    fn count(&self, table: &str) -> Result<i64> {
        let mut s = self.conn.prepare(&format!("SELECT COUNT(*) FROM {table}"))?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn offer_count(&self) -> Result<i64> {
        self.count("offers")
    }

    pub fn alert_count(&self) -> Result<i64> {
        self.count("alerts")
    }

    pub fn history_count(&self) -> Result<i64> {
        self.count("alert_history")
    }

    pub fn run_count(&self) -> Result<i64> {
        self.count("scrape_runs")
    }

    pub fn snapshot_range(&self) -> Result<(Option<NaiveDateTime>, Option<NaiveDateTime>)> {
        let mut s = self
            .conn
            .prepare("SELECT MIN(snapshot_ts), MAX(snapshot_ts) FROM offers")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self, url: &str) -> Result<i64> {
        let id = self.conn.query_row(
            "INSERT INTO scrape_runs (started_at, status, url) VALUES (?, 'running', ?) RETURNING id",
            params![now(), url],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(&self, run_id: i64, counts: RunCounts, error: Option<&str>) -> Result<()> {
        self.conn.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               offers_found = ?, qualifying = ?, alerts_triggered = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                now(),
                if error.is_none() { "success" } else { "error" },
                counts.offers_found as i64,
                counts.qualifying as i64,
                counts.alerts_triggered as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }
}

impl Store for Repository {
    fn save_snapshot(&self, snapshot_ts: NaiveDateTime, url: &str, rows: &[SnapshotRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO offers (
                snapshot_ts, selection_type, supplier, price_dollars_per_kwh, rate_type, term_months,
                etf, etf_amount, monthly_fee, monthly_fee_amount, renewable, promo, intro_price, url
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;

        for row in rows {
            let o = &row.offer;
            tx.execute(sql, params![
                snapshot_ts, row.selection_type.as_str(),
                o.supplier, o.price_per_kwh, o.rate_type, o.term_months.map(i64::from),
                o.early_termination_fee.raw, o.early_termination_fee.amount,
                o.monthly_fee.raw, o.monthly_fee.amount,
                o.renewable_content, o.promo_text, o.intro_price,
                url,
            ]).with_context(|| format!("insert offer {} ({})", o.supplier, row.selection_type.as_str()))?;
        }

        tx.commit()?;
        debug!("Saved {} snapshot rows at {}", rows.len(), snapshot_ts);
        Ok(rows.len())
    }

    fn active_alert_rules(&self) -> Result<Vec<AlertRuleRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE active ORDER BY id DESC"
        ))?;
        let alerts = stmt
            .query_map([], alert_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(alerts)
    }

    fn record_alert_match(&self, m: &AlertMatch) -> Result<()> {
        let Some(alert_id) = m.rule_id else { return Ok(()) };
        self.conn.execute(
            r#"INSERT INTO alert_history (alert_id, triggered_at, price, term_months, supplier, message)
               VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                alert_id,
                m.triggered_at,
                m.matched_offer.price_per_kwh,
                i64::from(m.term_months),
                m.matched_offer.supplier,
                m.message,
            ],
        ).with_context(|| format!("record history for alert #{}", alert_id))?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::term::TermExprError;
    use crate::models::SelectionType;
    use crate::selection::tests::offer;

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let repo = repo();
        repo.run_migrations().unwrap();
        assert_eq!(repo.alert_count().unwrap(), 0);
    }

    #[test]
    fn test_create_alert_validates_term_before_insert() {
        let repo = repo();
        let err = repo
            .create_alert("bad", 0.07, Some("twelve"), "me@example.com", true)
            .unwrap_err();
        assert!(err.downcast_ref::<TermExprError>().is_some());
        assert!(repo.create_alert("no threshold", f64::NAN, None, "me@example.com", true).is_err());
        assert!(repo.create_alert("", 0.07, None, "me@example.com", true).is_err());
        assert_eq!(repo.alert_count().unwrap(), 0);

        let id = repo
            .create_alert("cheap", 0.07, Some(" 12-24 "), "me@example.com", true)
            .unwrap();
        let alerts = repo.list_alerts().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, id);
        assert_eq!(alerts[0].term_qualifier.as_deref(), Some("12-24"));
        assert!(alerts[0].active);
    }

    #[test]
    fn test_created_at_is_local_time() {
        let repo = repo();
        repo.create_alert("cheap", 0.07, None, "me@example.com", true).unwrap();
        let created_at = repo.list_alerts().unwrap()[0].created_at;
        let drift = (Local::now().naive_local() - created_at).num_seconds().abs();
        assert!(drift < 60, "created_at {created_at} is not local time");

        let run = repo.begin_scrape_run("https://example.com").unwrap();
        let started_at: NaiveDateTime = repo
            .conn
            .query_row("SELECT started_at FROM scrape_runs WHERE id = ?", params![run], |r| r.get(0))
            .unwrap();
        assert!((Local::now().naive_local() - started_at).num_seconds().abs() < 60);
    }

    #[test]
    fn test_toggle_and_active_rules() {
        let repo = repo();
        let a = repo.create_alert("a", 0.07, None, "a@example.com", true).unwrap();
        let b = repo.create_alert("b", 0.08, Some(""), "b@example.com", true).unwrap();

        assert_eq!(repo.toggle_alert(a).unwrap(), Some(false));
        assert_eq!(repo.toggle_alert(9999).unwrap(), None);

        let active = repo.active_alert_rules().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b);
        assert_eq!(active[0].term_qualifier, None);
    }

    #[test]
    fn test_history_round_trip_and_delete() {
        let repo = repo();
        let id = repo.create_alert("cheap", 0.07, None, "me@example.com", true).unwrap();
        let m = AlertMatch {
            rule_id: Some(id),
            rule_name: "cheap".into(),
            recipient: Some("me@example.com".into()),
            triggered_at: now(),
            term_months: 12,
            price_threshold: 0.07,
            matched_offer: offer("Acme", 0.065, Some(12)),
            message: "$0.0650/kWh below $0.0700 for term 12 mo - Acme".into(),
        };
        repo.record_alert_match(&m).unwrap();
        repo.record_alert_match(&AlertMatch { rule_id: None, ..m.clone() }).unwrap();

        let history = repo.alert_history(Some(id), 200).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].alert_name, "cheap");
        assert_eq!(history[0].term_months, Some(12));
        assert_eq!(history[0].supplier.as_deref(), Some("Acme"));
        assert_eq!(repo.alert_history(None, 200).unwrap().len(), 1);

        assert!(repo.delete_alert(id).unwrap());
        assert_eq!(repo.history_count().unwrap(), 0);
        assert!(!repo.delete_alert(id).unwrap());
    }

    #[test]
    fn test_save_snapshot() {
        let repo = repo();
        let rows = vec![
            SnapshotRow { selection_type: SelectionType::Overall, offer: offer("Acme", 0.065, Some(24)) },
            SnapshotRow { selection_type: SelectionType::TermBest, offer: offer("Acme", 0.065, Some(24)) },
        ];
        let ts = now();
        assert_eq!(repo.save_snapshot(ts, "https://example.com", &rows).unwrap(), 2);
        assert_eq!(repo.offer_count().unwrap(), 2);
        let (min, max) = repo.snapshot_range().unwrap();
        assert!(min.is_some() && max.is_some());
    }

    #[test]
    fn test_scrape_run_log() {
        let repo = repo();
        let run = repo.begin_scrape_run("https://example.com").unwrap();
        repo.finish_scrape_run(run, RunCounts { offers_found: 3, ..Default::default() }, None)
            .unwrap();
        assert_eq!(repo.run_count().unwrap(), 1);
    }
}
