//! Contract-length qualifiers attached to alert rules.
//!
//! Accepted forms, first match wins:
//!
//! | text              | qualifier          |
//! |-------------------|--------------------|
//! | `""`              | unbounded          |
//! | `>=6`, `>6`       | at least 6 (`>` excludes 6) |
//! | `<=24`, `<24`     | at most 24 (`<` excludes 24) |
//! | `12+`             | at least 12        |
//! | `12-24`, `12 to 24 months` | 12 through 24 |
//! | `=12`, `exactly 12` | exactly 12       |
//! | `12`, `12 months` | exactly 12         |

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Offset applied to strict bounds so the bound itself falls outside the range.
pub const STRICT_EPSILON: f64 = 1e-9;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TermExprError {
    #[error("invalid term expression {expr:?}: {reason}")]
    InvalidTermExpression { expr: String, reason: String },
}

impl TermExprError {
    fn invalid(expr: &str, reason: impl Into<String>) -> Self {
        TermExprError::InvalidTermExpression {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}

/// Inclusive month range, resolved once when a rule is validated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TermQualifier {
    Unbounded,
    AtLeast(f64),
    AtMost(f64),
    Range(f64, f64),
    Exact(f64),
}

impl TermQualifier {
    /// `(min, max)`, `None` meaning unbounded on that side.
    pub fn bounds(&self) -> (Option<f64>, Option<f64>) {
        match *self {
            TermQualifier::Unbounded => (None, None),
            TermQualifier::AtLeast(min) => (Some(min), None),
            TermQualifier::AtMost(max) => (None, Some(max)),
            TermQualifier::Range(min, max) => (Some(min), Some(max)),
            TermQualifier::Exact(v) => (Some(v), Some(v)),
        }
    }

    pub fn contains(&self, term_months: u32) -> bool {
        let term = f64::from(term_months);
        let (min, max) = self.bounds();
        min.is_none_or(|lo| term >= lo) && max.is_none_or(|hi| term <= hi)
    }
}

impl fmt::Display for TermQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermQualifier::Unbounded => write!(f, "any term"),
            TermQualifier::AtLeast(min) => write!(f, ">= {min} mo"),
            TermQualifier::AtMost(max) => write!(f, "<= {max} mo"),
            TermQualifier::Range(min, max) => write!(f, "{min}-{max} mo"),
            TermQualifier::Exact(v) => write!(f, "{v} mo"),
        }
    }
}

static RE_TO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bto\b").expect("invalid regex: to"));

static RE_MONTH_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"months|month|mos|mo").expect("invalid regex: month words")
});

static RE_EXACT_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"exactly|exact").expect("invalid regex: exact words"));

/// Lower-case, "to" → "-", month words and all whitespace removed.
fn clean(text: &str) -> String {
    let lower = text.to_lowercase();
    let dashed = RE_TO.replace_all(&lower, "-");
    let stripped = RE_MONTH_WORDS.replace_all(&dashed, "");
    stripped.chars().filter(|c| !c.is_whitespace()).collect()
}

fn number(expr: &str, text: &str) -> Result<f64, TermExprError> {
    let value: f64 = text
        .parse()
        .map_err(|_| TermExprError::invalid(expr, format!("{text:?} is not a number")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(TermExprError::invalid(expr, format!("{text:?} is not a month count")));
    }
    Ok(value)
}

pub fn parse_term_expression(expr: &str) -> Result<TermQualifier, TermExprError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Ok(TermQualifier::Unbounded);
    }

    // Two-character comparators are listed first so ">=" never reads as ">".
    let comparator = [">=", "<=", ">", "<"]
        .into_iter()
        .find_map(|op| trimmed.strip_prefix(op).map(|rest| (op, rest)));
    if let Some((op, rest)) = comparator {
        let v = number(expr, &clean(rest))?;
        return Ok(match op {
            ">=" => TermQualifier::AtLeast(v),
            "<=" => TermQualifier::AtMost(v),
            ">" => TermQualifier::AtLeast(v + STRICT_EPSILON),
            _ => TermQualifier::AtMost(v - STRICT_EPSILON),
        });
    }

    let cleaned = clean(trimmed);

    if let Some(rest) = cleaned.strip_suffix('+') {
        return Ok(TermQualifier::AtLeast(number(expr, rest)?));
    }

    if let Some((lo, hi)) = cleaned.split_once('-') {
        let (lo, hi) = (number(expr, lo)?, number(expr, hi)?);
        if lo > hi {
            return Err(TermExprError::invalid(expr, "range lower bound exceeds upper bound"));
        }
        return Ok(TermQualifier::Range(lo, hi));
    }

    let lower = trimmed.to_lowercase();
    if cleaned.starts_with('=') || lower.contains("exact") {
        let value = RE_EXACT_WORDS.replace_all(cleaned.trim_start_matches('='), "");
        return Ok(TermQualifier::Exact(number(expr, &value)?));
    }

    Ok(TermQualifier::Exact(number(expr, &cleaned)?))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
