use crate::models::{FeeAmount, Offer, RawOfferRow};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

// ── Header normalisation ──────────────────────────────────────────────────────

/// Canonical columns of the comparison table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Compare,
    Supplier,
    Price,
    RateType,
    Renewable,
    IntroPrice,
    Term,
    Etf,
    MonthlyFee,
    Promo,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Compare => "compare",
            Field::Supplier => "supplier",
            Field::Price => "price",
            Field::RateType => "rate_type",
            Field::Renewable => "renewable",
            Field::IntroPrice => "intro_price",
            Field::Term => "term",
            Field::Etf => "etf",
            Field::MonthlyFee => "monthly_fee",
            Field::Promo => "promo",
        }
    }

    /// Look up an already-normalised header in the synonym table.
    fn from_normalised(header: &str) -> Option<Field> {
        let field = match header {
            "click to compare" | "compare" => Field::Compare,
            "supplier" | "company" => Field::Supplier,
            "$/kwh" | "price" => Field::Price,
            "rate type" | "rate_type" => Field::RateType,
            "renew. content" | "renewable content" | "renewable" => Field::Renewable,
            "intro. price" | "intro price" | "intro_price" => Field::IntroPrice,
            "term. length" | "term length" | "term" => Field::Term,
            "early term. fee" | "early termination fee" | "etf" => Field::Etf,
            "monthly fee" | "monthly_fee" => Field::MonthlyFee,
            "promo. offers" | "promo offers" | "promo" => Field::Promo,
            _ => return None,
        };
        Some(field)
    }

    pub fn from_header(raw: &str) -> Option<Field> {
        Self::from_normalised(&collapse_header(raw))
    }
}

/// "  Early   Term. Fee " → "early term. fee"
fn collapse_header(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Map a raw header to its canonical name, or the collapsed lower-case text
/// when the header is not one we know.
pub fn normalise_header(raw: &str) -> String {
    let collapsed = collapse_header(raw);
    match Field::from_normalised(&collapsed) {
        Some(field) => field.as_str().to_string(),
        None => collapsed,
    }
}

// ── Field parsers ─────────────────────────────────────────────────────────────

static RE_UNSIGNED_DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+(?:\.\d+)?").expect("invalid regex: unsigned decimal")
});

static RE_SIGNED_DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-?\d+(?:\.\d+)?").expect("invalid regex: signed decimal")
});

static RE_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("invalid regex: integer"));

/// Fee cell text that means "nothing here" rather than a number.
const FEE_PLACEHOLDERS: &[&str] = &["—", "-", "n/a", "na", "none", "no", "not applicable"];

/// "$0.0649/kWh" → 0.0649 | "1,234.5" → 1234.5 | "call" → None
pub fn parse_price_per_kwh(s: &str) -> Option<f64> {
    let cleaned = s.replace(',', "");
    RE_UNSIGNED_DECIMAL
        .find(&cleaned)
        .and_then(|m| m.as_str().parse().ok())
}

/// "12 months" → 12 | "Month to month" → None
pub fn parse_term_months(s: &str) -> Option<u32> {
    RE_INTEGER.find(s).and_then(|m| m.as_str().parse().ok())
}

/// "$0.00" → 0.0 | "$-5" → -5.0 | "—" → None | "see terms" → None
///
/// A placeholder is reported the same way as unreadable text. Callers must
/// not read `None` as zero.
pub fn parse_money_amount(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || FEE_PLACEHOLDERS.contains(&s) {
        return None;
    }
    let cleaned = s.replace(',', "");
    RE_SIGNED_DECIMAL
        .find(&cleaned)
        .and_then(|m| m.as_str().parse().ok())
}

fn fee(raw: Option<&str>) -> FeeAmount {
    let raw = raw.unwrap_or_default().to_string();
    let amount = parse_money_amount(&raw);
    FeeAmount { raw, amount }
}

// ── Raw row → Offer ───────────────────────────────────────────────────────────

/// Returns `None` for spacer and separator rows: no supplier or no price.
pub fn raw_row_to_offer(row: &RawOfferRow) -> Option<Offer> {
    let supplier = row.supplier.as_deref().unwrap_or_default().trim();
    let price = row.price.as_deref().and_then(parse_price_per_kwh);

    let Some(price_per_kwh) = price.filter(|_| !supplier.is_empty()) else {
        debug!("Skipping non-offer row (supplier={:?}, price={:?})", supplier, row.price);
        return None;
    };

    let text = |cell: &Option<String>| cell.clone().unwrap_or_default();

    Some(Offer {
        supplier: supplier.to_string(),
        price_per_kwh,
        rate_type: text(&row.rate_type),
        term_months: row.term.as_deref().and_then(parse_term_months),
        early_termination_fee: fee(row.etf.as_deref()),
        monthly_fee: fee(row.monthly_fee.as_deref()),
        renewable_content: text(&row.renewable),
        promo_text: text(&row.promo),
        intro_price: text(&row.intro_price),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
