use crate::alerts::term::parse_term_expression;
use crate::models::{AlertMatch, AlertRule, AlertRuleRecord, SelectionResult, SkippedRule};
use crate::utils::{fmt_price, fmt_term};
use chrono::NaiveDateTime;
use tracing::{debug, warn};

/// Compile stored rules for matching. Inactive rules are dropped; rules whose
/// stored term qualifier no longer parses are skipped and reported.
pub fn compile_rules(records: &[AlertRuleRecord]) -> (Vec<AlertRule>, Vec<SkippedRule>) {
    let mut rules = Vec::new();
    let mut skipped = Vec::new();

    for record in records.iter().filter(|r| r.active) {
        let term_qualifier = match record.term_qualifier.as_deref().map(parse_term_expression) {
            None => None,
            Some(Ok(q)) => Some(q),
            Some(Err(e)) => {
                warn!("Skipping alert #{} '{}': {}", record.id, record.name, e);
                skipped.push(SkippedRule {
                    rule_id: record.id,
                    name: record.name.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        debug!(
            "Alert #{} '{}': below {} for {}",
            record.id,
            record.name,
            fmt_price(record.price_threshold),
            term_qualifier.map_or_else(|| "any term".to_string(), |q| q.to_string())
        );
        rules.push(AlertRule {
            id: Some(record.id),
            name: record.name.clone(),
            price_threshold: record.price_threshold,
            term_qualifier,
            recipient: Some(record.recipient.clone()),
        });
    }

    (rules, skipped)
}

pub fn render_message(price: f64, threshold: f64, term_months: u32, supplier: &str) -> String {
    format!(
        "{}/kWh below {} for term {} - {}",
        fmt_price(price),
        fmt_price(threshold),
        fmt_term(Some(term_months)),
        supplier
    )
}

/// Per-term winners that trip one rule, cheapest first.
pub fn match_rule(
    rule: &AlertRule,
    selection: &SelectionResult,
    triggered_at: NaiveDateTime,
) -> Vec<AlertMatch> {
    let mut matches: Vec<AlertMatch> = selection
        .per_term
        .iter()
        .filter(|(term, offer)| {
            offer.price_per_kwh < rule.price_threshold
                && rule.term_qualifier.is_none_or(|q| q.contains(**term))
        })
        .map(|(&term, offer)| AlertMatch {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            recipient: rule.recipient.clone(),
            triggered_at,
            term_months: term,
            price_threshold: rule.price_threshold,
            matched_offer: offer.clone(),
            message: render_message(offer.price_per_kwh, rule.price_threshold, term, &offer.supplier),
        })
        .collect();

    matches.sort_by(|a, b| {
        a.matched_offer
            .price_per_kwh
            .total_cmp(&b.matched_offer.price_per_kwh)
            .then(a.term_months.cmp(&b.term_months))
    });

    debug!("Alert '{}': {} matches", rule.name, matches.len());
    matches
}

pub fn evaluate(
    rules: &[AlertRule],
    selection: &SelectionResult,
    triggered_at: NaiveDateTime,
) -> Vec<AlertMatch> {
    rules
        .iter()
        .flat_map(|rule| match_rule(rule, selection, triggered_at))
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::term::TermQualifier;
    use crate::selection::tests::offer;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 18)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn selection(winners: &[(u32, &str, f64)]) -> SelectionResult {
        let per_term: BTreeMap<u32, _> = winners
            .iter()
            .map(|&(term, supplier, price)| (term, offer(supplier, price, Some(term))))
            .collect();
        SelectionResult { overall: None, per_term }
    }

    fn record(id: i64, threshold: f64, term: Option<&str>) -> AlertRuleRecord {
        AlertRuleRecord {
            id,
            name: format!("rule {id}"),
            price_threshold: threshold,
            term_qualifier: term.map(str::to_string),
            recipient: "me@example.com".into(),
            active: true,
            created_at: now(),
        }
    }

    #[test]
    fn test_term_qualifier_limits_matches() {
        let (rules, skipped) = compile_rules(&[record(1, 0.07, Some("12-24"))]);
        assert!(skipped.is_empty());

        let sel = selection(&[(12, "Twelve Co", 0.0650), (36, "Long Co", 0.0600)]);
        let matches = evaluate(&rules, &sel, now());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].term_months, 12);
        assert_eq!(matches[0].rule_id, Some(1));
        assert_eq!(
            matches[0].message,
            "$0.0650/kWh below $0.0700 for term 12 mo - Twelve Co"
        );
    }

    #[test]
    fn test_every_tripped_winner_is_reported() {
        let (rules, _) = compile_rules(&[record(1, 0.07, None)]);
        let sel = selection(&[(12, "A", 0.0650), (24, "B", 0.0710), (36, "C", 0.0600)]);
        let terms: Vec<u32> = evaluate(&rules, &sel, now())
            .iter()
            .map(|m| m.term_months)
            .collect();
        assert_eq!(terms, [36, 12]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let rule = AlertRule {
            id: None,
            name: "below".into(),
            price_threshold: 0.065,
            term_qualifier: Some(TermQualifier::Unbounded),
            recipient: None,
        };
        let sel = selection(&[(12, "A", 0.065)]);
        assert!(match_rule(&rule, &sel, now()).is_empty());
    }

    #[test]
    fn test_bad_stored_qualifier_is_skipped() {
        let mut inactive = record(3, 0.10, None);
        inactive.active = false;
        let records = [
            record(1, 0.07, Some("twelve-ish")),
            record(2, 0.07, Some("12+")),
            inactive,
        ];
        let (rules, skipped) = compile_rules(&records);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, Some(2));
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].rule_id, 1);

        let sel = selection(&[(6, "A", 0.05), (12, "B", 0.05)]);
        let matches = evaluate(&rules, &sel, now());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_offer.supplier, "B");
    }
}
