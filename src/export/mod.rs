//! CSV snapshot log: one row per run holding the overall winner.

use crate::models::Offer;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Serialize)]
struct CsvSnapshotRow<'a> {
    timestamp: String,
    supplier: &'a str,
    price_dollars_per_kwh: f64,
    rate_type: &'a str,
    term_months: Option<u32>,
    etf: &'a str,
    etf_amount: Option<f64>,
    monthly_fee: &'a str,
    monthly_fee_amount: Option<f64>,
    renewable: &'a str,
    promo: &'a str,
    intro_price: &'a str,
    url: &'a str,
}

/// Append the winning offer; the header is written only to an empty file.
pub fn append_snapshot(path: &Path, best: &Offer, timestamp: NaiveDateTime, url: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Could not open CSV {:?}", path))?;
    let is_empty = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_empty)
        .from_writer(file);

    writer.serialize(CsvSnapshotRow {
        timestamp: timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        supplier: &best.supplier,
        price_dollars_per_kwh: best.price_per_kwh,
        rate_type: &best.rate_type,
        term_months: best.term_months,
        etf: &best.early_termination_fee.raw,
        etf_amount: best.early_termination_fee.amount,
        monthly_fee: &best.monthly_fee.raw,
        monthly_fee_amount: best.monthly_fee.amount,
        renewable: &best.renewable_content,
        promo: &best.promo_text,
        intro_price: &best.intro_price,
        url,
    })?;
    writer.flush()?;

    debug!("Appended snapshot to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::tests::offer;
    use chrono::Utc;

    #[test]
    fn test_header_written_once() {
        let path = std::env::temp_dir().join(format!(
            "rate_watch_snapshot_{}_{}.csv",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let now = Utc::now().naive_utc();

        append_snapshot(&path, &offer("Acme", 0.065, Some(12)), now, "https://example.com").unwrap();
        append_snapshot(&path, &offer("Bright", 0.061, None), now, "https://example.com").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,supplier,price_dollars_per_kwh"));
        assert!(lines[1].contains("Acme,0.065,Fixed,12,$0.00,0.0"));
        assert!(lines[2].contains("Bright,0.061,Fixed,,"));
    }
}
