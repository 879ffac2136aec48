//! Qualification policy and winner selection.
//!
//! An offer qualifies when it is not variable-rate and both its early
//! termination fee and monthly fee parsed to exactly zero. Fees that are
//! missing, placeholder text or unreadable all disqualify.

use crate::models::{Offer, SelectionResult};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

pub fn qualifies(offer: &Offer) -> bool {
    !offer.is_variable_rate()
        && offer.early_termination_fee.is_explicit_zero()
        && offer.monthly_fee.is_explicit_zero()
}

fn qualifying(offers: &[Offer]) -> impl Iterator<Item = &Offer> {
    offers
        .iter()
        .filter(|o| !o.price_per_kwh.is_nan() && qualifies(o))
}

/// Cheapest first; at equal price the longer term wins and a missing term
/// counts as the shortest.
fn overall_order(a: &Offer, b: &Offer) -> Ordering {
    a.price_per_kwh
        .total_cmp(&b.price_per_kwh)
        .then_with(|| b.term_months.cmp(&a.term_months))
}

/// Cheapest first; at equal price suppliers sort alphabetically.
fn per_term_order(a: &Offer, b: &Offer) -> Ordering {
    a.price_per_kwh
        .total_cmp(&b.price_per_kwh)
        .then_with(|| a.supplier.cmp(&b.supplier))
}

pub fn choose_overall(offers: &[Offer]) -> Option<Offer> {
    qualifying(offers)
        .min_by(|a, b| overall_order(a, b))
        .cloned()
}

pub fn choose_per_term(offers: &[Offer]) -> BTreeMap<u32, Offer> {
    let mut by_term: BTreeMap<u32, Offer> = BTreeMap::new();

    for offer in qualifying(offers) {
        let Some(term) = offer.term_months else { continue };
        match by_term.get(&term) {
            Some(best) if per_term_order(offer, best) != Ordering::Less => {}
            _ => {
                by_term.insert(term, offer.clone());
            }
        }
    }

    by_term
}

pub fn select(offers: &[Offer]) -> SelectionResult {
    let result = SelectionResult {
        overall: choose_overall(offers),
        per_term: choose_per_term(offers),
    };
    debug!(
        "Selection: overall={:?}, {} term winners",
        result.overall.as_ref().map(|o| &o.supplier),
        result.per_term.len()
    );
    result
}

/// The `n` best qualifying offers in overall order.
pub fn rank_qualifying(offers: &[Offer], n: usize) -> Vec<Offer> {
    let mut ranked: Vec<&Offer> = qualifying(offers).collect();
    ranked.sort_by(|a, b| overall_order(a, b));
    ranked.into_iter().take(n).cloned().collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
