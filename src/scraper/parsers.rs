use crate::models::{Offer, RawOfferRow};
use crate::scraper::cleaner::{normalise_header, raw_row_to_offer, Field};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("could not locate the offers table on the page")]
    NoOffersTableFound,

    #[error("invalid selector {0:?}")]
    Selector(&'static str),
}

fn selector(css: &'static str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|_| ExtractError::Selector(css))
}

/// Text of an element with each text node trimmed and joined by one space.
fn cell_text(el: ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Column index ──────────────────────────────────────────────────────────────

/// Canonical field → cell position, built once per table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnIndex {
    positions: HashMap<Field, usize>,
}

impl ColumnIndex {
    /// Later duplicates of a header win.
    pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> Self {
        let positions = headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| Field::from_header(h.as_ref()).map(|f| (f, i)))
            .collect();
        Self { positions }
    }

    pub fn get(&self, field: Field) -> Option<usize> {
        self.positions.get(&field).copied()
    }

    pub fn has(&self, field: Field) -> bool {
        self.positions.contains_key(&field)
    }

    fn is_offers_table(&self) -> bool {
        self.has(Field::Price) && self.has(Field::Supplier)
    }
}

// ── Table locator ─────────────────────────────────────────────────────────────

/// Normalised header texts of a table: `thead th` if present, else the cells of
/// the first row.
fn table_headers(table: ElementRef) -> Result<Vec<String>, ExtractError> {
    let thead_sel = selector("thead th")?;
    let mut headers: Vec<String> = table
        .select(&thead_sel)
        .map(|th| normalise_header(&cell_text(th)))
        .collect();

    if headers.is_empty() {
        let tr_sel = selector("tr")?;
        let cell_sel = selector("th, td")?;
        if let Some(first) = table.select(&tr_sel).next() {
            headers = first
                .select(&cell_sel)
                .map(|c| normalise_header(&cell_text(c)))
                .collect();
        }
    }

    Ok(headers)
}

/// The first table, in document order, whose headers name both a price and a
/// supplier column.
pub fn locate_offers_table(doc: &Html) -> Result<(ElementRef<'_>, ColumnIndex), ExtractError> {
    let table_sel = selector("table")?;

    for (n, table) in doc.select(&table_sel).enumerate() {
        let headers = table_headers(table)?;
        let index = ColumnIndex::from_headers(&headers);
        if index.is_offers_table() {
            debug!("Offers table is table #{} with headers {:?}", n, headers);
            return Ok((table, index));
        }
    }

    Err(ExtractError::NoOffersTableFound)
}

// ── Row extraction ────────────────────────────────────────────────────────────

fn raw_row(cells: &[ElementRef], index: &ColumnIndex) -> Result<RawOfferRow, ExtractError> {
    let title_sel = selector("span.retail-title")?;
    let text_at = |field: Field| {
        index
            .get(field)
            .and_then(|i| cells.get(i))
            .map(|c| cell_text(*c))
    };

    // Supplier cells also carry badges; the name sits in a title span.
    let supplier = index.get(Field::Supplier).and_then(|i| cells.get(i)).map(|cell| {
        cell.select(&title_sel)
            .next()
            .map(cell_text)
            .unwrap_or_else(|| cell_text(*cell))
    });

    Ok(RawOfferRow {
        supplier,
        price: text_at(Field::Price),
        rate_type: text_at(Field::RateType),
        term: text_at(Field::Term),
        etf: text_at(Field::Etf),
        monthly_fee: text_at(Field::MonthlyFee),
        renewable: text_at(Field::Renewable),
        promo: text_at(Field::Promo),
        intro_price: text_at(Field::IntroPrice),
    })
}

/// Raw rows of the offers table, header and spacer rows included.
pub fn parse_offer_rows(html: &str) -> Result<Vec<RawOfferRow>, ExtractError> {
    let doc = Html::parse_document(html);
    let (table, index) = locate_offers_table(&doc)?;

    let body_sel = selector("tbody tr")?;
    let tr_sel = selector("tr")?;
    let td_sel = selector("td")?;

    let mut trs: Vec<ElementRef> = table.select(&body_sel).collect();
    if trs.is_empty() {
        trs = table.select(&tr_sel).collect();
    }

    let mut rows = Vec::with_capacity(trs.len());
    for tr in trs {
        let cells: Vec<ElementRef> = tr.select(&td_sel).collect();
        if cells.is_empty() {
            continue;
        }
        rows.push(raw_row(&cells, &index)?);
    }

    Ok(rows)
}

/// Parse every offer out of a comparison page, in document order.
pub fn extract_offers(html: &str) -> Result<Vec<Offer>, ExtractError> {
    let raw_rows = parse_offer_rows(html)?;
    let total = raw_rows.len();
    let offers: Vec<Offer> = raw_rows.iter().filter_map(raw_row_to_offer).collect();
    info!("Extracted {} offers from {} table rows", offers.len(), total);
    Ok(offers)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const PAGE: &str = r#"
<html><body>
  <table id="nav"><tr><td>Home</td><td>Electric</td></tr></table>
  <table class="offers">
    <thead>
      <tr>
        <th>Click to Compare</th><th>Supplier</th><th>$/kWh</th><th>Rate Type</th>
        <th>Renew. Content</th><th>Intro. Price</th><th>Term. Length</th>
        <th>Early Term. Fee</th><th>Monthly Fee</th><th>Promo. Offers</th>
      </tr>
    </thead>
    <tbody>
      <tr>
        <td><input type="checkbox"></td>
        <td><span class="retail-title">Bright Power</span><span class="badge">New!</span></td>
        <td>$0.0650</td><td>Fixed</td><td>100%</td><td>No</td>
        <td>12 months</td><td>$0.00</td><td>$0.00</td><td>None</td>
      </tr>
      <tr>
        <td></td><td>Acme Energy</td><td>$0.0650</td><td>Fixed</td><td>0%</td><td>No</td>
        <td>24 months</td><td>$0.00</td><td>$0.00</td><td></td>
      </tr>
      <tr><td colspan="10">&nbsp;</td></tr>
      <tr>
        <td></td><td>Volt Co</td><td>$0.0590</td><td>Variable</td><td>0%</td><td>No</td>
        <td>6 months</td><td>$0.00</td><td>$0.00</td><td></td>
      </tr>
      <tr>
        <td></td><td>Dashing Electric</td><td>$0.0600</td><td>Fixed</td><td>0%</td><td>No</td>
        <td>36 months</td><td>—</td><td>$0.00</td><td></td>
      </tr>
      <tr>
        <td></td><td>Cheap &amp; Cheerful</td><td>$0.0610</td><td>Fixed</td>
      </tr>
    </tbody>
  </table>
</body></html>
"#;

    #[test]
    fn test_locate_skips_tables_without_offer_headers() {
        let doc = Html::parse_document(PAGE);
        let (table, index) = locate_offers_table(&doc).unwrap();
        assert_eq!(table.value().attr("class"), Some("offers"));
        assert_eq!(index.get(Field::Supplier), Some(1));
        assert_eq!(index.get(Field::Price), Some(2));
        assert_eq!(index.get(Field::MonthlyFee), Some(8));
    }

    #[test]
    fn test_locate_falls_back_to_first_row() {
        let html = r#"<table>
            <tr><td>Company</td><td>Price</td><td>Term Length</td></tr>
            <tr><td>Acme</td><td>0.07</td><td>12</td></tr>
        </table>"#;
        let offers = extract_offers(html).unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].supplier, "Acme");
        assert_eq!(offers[0].term_months, Some(12));
    }

    #[test]
    fn test_no_offers_table() {
        let html = "<table><tr><th>Name</th><th>Age</th></tr></table>";
        assert!(matches!(
            extract_offers(html),
            Err(ExtractError::NoOffersTableFound)
        ));
        assert!(matches!(
            extract_offers("<p>maintenance</p>"),
            Err(ExtractError::NoOffersTableFound)
        ));
    }

    #[test]
    fn test_extract_offers() {
        let offers = extract_offers(PAGE).unwrap();
        let suppliers: Vec<&str> = offers.iter().map(|o| o.supplier.as_str()).collect();
        assert_eq!(
            suppliers,
            ["Bright Power", "Acme Energy", "Volt Co", "Dashing Electric", "Cheap & Cheerful"]
        );

        let bright = &offers[0];
        assert_eq!(bright.price_per_kwh, 0.065);
        assert_eq!(bright.rate_type, "Fixed");
        assert_eq!(bright.term_months, Some(12));
        assert_eq!(bright.renewable_content, "100%");
        assert_eq!(bright.intro_price, "No");
        assert_eq!(bright.promo_text, "None");

        let dashing = &offers[3];
        assert_eq!(dashing.early_termination_fee.raw, "—");
        assert_eq!(dashing.early_termination_fee.amount, None);

        // Short row: trailing cells are absent
        let cheap = &offers[4];
        assert_eq!(cheap.term_months, None);
        assert_eq!(cheap.monthly_fee.raw, "");
        assert_eq!(cheap.monthly_fee.amount, None);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        assert_eq!(extract_offers(PAGE).unwrap(), extract_offers(PAGE).unwrap());
    }
}
