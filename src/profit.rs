//! Profit requirement evaluator
//!
//! Decides which lots may be sold at a price and at what limit price.

use std::cmp::Ordering;

use crate::config::{ProfitReference, StrategyParams};
use crate::ledger::LotLedger;
use crate::{Direction, Lot, LotId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitPolicy {
    pub base: f64,
    pub reference: ProfitReference,
    pub consecutive_increment: Option<f64>,
}

impl ProfitPolicy {
    pub fn from_params(params: &StrategyParams) -> Self {
        Self {
            base: params.profit_requirement,
            reference: params.profit_reference,
            consecutive_increment: params.profit_consecutive_increment,
        }
    }

    /// Requirement after `consecutive_sells` sells since the last buy
    pub fn effective_requirement(&self, consecutive_sells: u32) -> f64 {
        let growth = self
            .consecutive_increment
            .map(|inc| (1.0 + inc).powi(consecutive_sells as i32))
            .unwrap_or(1.0);
        self.base * growth
    }

    /// Lots eligible for sale at `price`, in ledger order
    pub fn eligible_lots(&self, ledger: &LotLedger, price: f64, requirement: f64) -> Vec<LotId> {
        let direction = ledger.direction();
        match self.reference {
            ProfitReference::PerLot => ledger
                .lots()
                .iter()
                .filter(|lot| clears_requirement(direction, lot.purchase_price, price, requirement))
                .map(|lot| lot.id)
                .collect(),
            ProfitReference::AverageCost => {
                if ledger.is_empty()
                    || !clears_requirement(direction, ledger.average_cost(), price, requirement)
                {
                    return Vec::new();
                }
                ledger.lots().iter().map(|lot| lot.id).collect()
            }
        }
    }

    /// Price the selected lots are measured against for the limit price
    pub fn reference_price(&self, ledger: &LotLedger, selected: &[&Lot]) -> Option<f64> {
        match self.reference {
            ProfitReference::AverageCost if !ledger.is_empty() => Some(ledger.average_cost()),
            _ => {
                let prices = selected.iter().map(|l| l.purchase_price);
                match ledger.direction() {
                    Direction::Long => prices.reduce(f64::max),
                    Direction::Short => prices.reduce(f64::min),
                }
            }
        }
    }
}

/// Whether `price` beats `entry` by more than `requirement` in the direction's favour
pub fn clears_requirement(direction: Direction, entry: f64, price: f64, requirement: f64) -> bool {
    match direction {
        Direction::Long => price > entry * (1.0 + requirement),
        Direction::Short => price < entry * (1.0 - requirement),
    }
}

/// Rank candidate lots for sale: highest entry first when long, lowest first
/// when short, ties broken by age. At most `max_lots` are returned.
pub fn select_lots<'a>(ledger: &'a LotLedger, candidates: &[LotId], max_lots: usize) -> Vec<&'a Lot> {
    let mut lots: Vec<&Lot> = candidates.iter().filter_map(|id| ledger.get(*id)).collect();
    let direction = ledger.direction();
    lots.sort_by(|a, b| {
        let by_price = match direction {
            Direction::Long => b.purchase_price.partial_cmp(&a.purchase_price),
            Direction::Short => a.purchase_price.partial_cmp(&b.purchase_price),
        };
        by_price.unwrap_or(Ordering::Equal).then(a.id.cmp(&b.id))
    });
    lots.truncate(max_lots);
    lots
}

/// Worst acceptable fill for a trailing sell
pub fn limit_price(
    direction: Direction,
    reference: f64,
    requirement: f64,
    stop_price: f64,
    slippage: f64,
) -> f64 {
    match direction {
        Direction::Long => (reference * (1.0 + requirement)).max(stop_price * (1.0 - slippage)),
        Direction::Short => (reference * (1.0 - requirement)).min(stop_price * (1.0 + slippage)),
    }
}
