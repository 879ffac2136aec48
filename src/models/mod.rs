use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::alerts::term::TermQualifier;

// ── Offer ─────────────────────────────────────────────────────────────────────

/// A fee cell as displayed on the page plus its parsed amount.
///
/// `amount` is `None` both for placeholder text ("—", "n/a", ...) and for text
/// with no number in it. Qualification treats both as disqualifying.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeeAmount {
    pub raw: String,
    pub amount: Option<f64>,
}

impl FeeAmount {
    pub fn is_explicit_zero(&self) -> bool {
        self.amount == Some(0.0)
    }
}

/// One parsed row of the comparison table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub supplier: String,
    pub price_per_kwh: f64,
    pub rate_type: String,
    pub term_months: Option<u32>,
    pub early_termination_fee: FeeAmount,
    pub monthly_fee: FeeAmount,
    pub renewable_content: String,
    pub promo_text: String,
    pub intro_price: String,
}

impl Offer {
    pub fn is_variable_rate(&self) -> bool {
        self.rate_type.trim().to_lowercase().starts_with("variable")
    }
}

// ── Raw table row ─────────────────────────────────────────────────────────────

/// Cell text pulled from one table row, keyed by canonical column.
/// Missing columns and padded trailing cells stay `None`.
#[derive(Debug, Clone, Default)]
pub struct RawOfferRow {
    pub supplier: Option<String>,
    pub price: Option<String>,
    pub rate_type: Option<String>,
    pub term: Option<String>,
    pub etf: Option<String>,
    pub monthly_fee: Option<String>,
    pub renewable: Option<String>,
    pub promo: Option<String>,
    pub intro_price: Option<String>,
}

// ── Selection ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionResult {
    pub overall: Option<Offer>,
    /// Cheapest qualifying offer per contract length, ascending by term.
    pub per_term: BTreeMap<u32, Offer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionType {
    Overall,
    TermBest,
}

impl SelectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionType::Overall => "overall",
            SelectionType::TermBest => "term_best",
        }
    }
}

/// An offer as written to the snapshot table.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub selection_type: SelectionType,
    pub offer: Offer,
}

impl SelectionResult {
    /// Overall winner first, then one row per term winner.
    pub fn snapshot_rows(&self) -> Vec<SnapshotRow> {
        let overall = self.overall.iter().map(|o| SnapshotRow {
            selection_type: SelectionType::Overall,
            offer: o.clone(),
        });
        let per_term = self.per_term.values().map(|o| SnapshotRow {
            selection_type: SelectionType::TermBest,
            offer: o.clone(),
        });
        overall.chain(per_term).collect()
    }
}

// ── Alerts ────────────────────────────────────────────────────────────────────

/// An alert definition as stored. The term qualifier is kept as the text the
/// user typed and compiled when rules are loaded for matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRuleRecord {
    pub id: i64,
    pub name: String,
    pub price_threshold: f64,
    pub term_qualifier: Option<String>,
    pub recipient: String,
    pub active: bool,
    pub created_at: NaiveDateTime,
}

/// A rule ready for matching. `id` is `None` for the ad-hoc `--alert-below`
/// threshold, which is never written to history.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub id: Option<i64>,
    pub name: String,
    pub price_threshold: f64,
    pub term_qualifier: Option<TermQualifier>,
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AlertMatch {
    pub rule_id: Option<i64>,
    pub rule_name: String,
    pub recipient: Option<String>,
    pub triggered_at: NaiveDateTime,
    pub term_months: u32,
    pub price_threshold: f64,
    pub matched_offer: Offer,
    pub message: String,
}

/// A stored rule that could not be compiled and was left out of matching.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRule {
    pub rule_id: i64,
    pub name: String,
    pub reason: String,
}

/// One row of the alert history table joined with its rule.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertHistoryEntry {
    pub id: i64,
    pub alert_id: i64,
    pub alert_name: String,
    pub recipient: String,
    pub triggered_at: NaiveDateTime,
    pub price: f64,
    pub term_months: Option<u32>,
    pub supplier: Option<String>,
    pub message: Option<String>,
}
