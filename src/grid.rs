//! Grid spacing evaluator
//!
//! Decides whether a candidate buy price is far enough from existing
//! positions. Sizing (fixed or dynamic, optionally widening with each
//! consecutive buy) is computed first, then checked against every lot or
//! against the average cost.

use crate::config::{AboveCostSpacing, GridReference, GridScaling, StrategyParams};
use crate::ledger::LotLedger;
use crate::Direction;

/// Float slack for prices sitting exactly on a grid line
const GRID_TOLERANCE: f64 = 1e-12;

/// Grid policy axes taken from the active parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPolicy {
    pub base: f64,
    pub reference: GridReference,
    pub above_cost: AboveCostSpacing,
    pub scaling: GridScaling,
    pub consecutive_increment: Option<f64>,
}

impl GridPolicy {
    pub fn from_params(params: &StrategyParams) -> Self {
        Self {
            base: params.grid_interval_percent,
            reference: params.grid_reference,
            above_cost: params.above_cost_spacing,
            scaling: params.grid_scaling,
            consecutive_increment: params.grid_consecutive_increment,
        }
    }

    /// Effective grid size at `price` after `consecutive_buys` buys since the last sell
    pub fn effective_size(
        &self,
        price: f64,
        reference_price: Option<f64>,
        consecutive_buys: u32,
    ) -> f64 {
        let dynamic = match (self.scaling, reference_price) {
            (GridScaling::Dynamic, Some(reference)) => dynamic_factor(reference, price),
            _ => 1.0,
        };
        let incremental = self
            .consecutive_increment
            .map(|inc| (1.0 + inc).powi(consecutive_buys as i32))
            .unwrap_or(1.0);
        self.base * dynamic * incremental
    }

    /// Whether a buy at `price` respects `grid_size`
    pub fn admits(&self, ledger: &LotLedger, price: f64, grid_size: f64) -> bool {
        match self.reference {
            GridReference::PerLot => lot_spacing_ok(ledger, price, grid_size),
            GridReference::AverageCost => {
                average_cost_spacing_ok(ledger, price, grid_size, self.above_cost)
            }
        }
    }
}

/// `sqrt(reference / price)`: tighter percentage spacing at high prices
pub fn dynamic_factor(reference_price: f64, price: f64) -> f64 {
    if reference_price <= 0.0 || price <= 0.0 {
        return 1.0;
    }
    (reference_price / price).sqrt()
}

/// Every open lot must be at least `grid_size` away, relative to its own price
pub fn lot_spacing_ok(ledger: &LotLedger, price: f64, grid_size: f64) -> bool {
    ledger.lots().iter().all(|lot| {
        let distance = (price - lot.purchase_price).abs() / lot.purchase_price;
        distance + GRID_TOLERANCE >= grid_size
    })
}

/// Distance from the average cost must reach `grid_size`. An empty ledger
/// always admits. Under `Half`, buys on the favourable side of the average
/// cost (above it when long, below it when short) need half the spacing.
pub fn average_cost_spacing_ok(
    ledger: &LotLedger,
    price: f64,
    grid_size: f64,
    above_cost: AboveCostSpacing,
) -> bool {
    let average = ledger.average_cost();
    if ledger.is_empty() || average <= 0.0 {
        return true;
    }

    let favourable = match ledger.direction() {
        Direction::Long => price > average,
        Direction::Short => price < average,
    };
    let required = match above_cost {
        AboveCostSpacing::Half if favourable => grid_size / 2.0,
        _ => grid_size,
    };

    let distance = (price - average).abs() / average;
    distance + GRID_TOLERANCE >= required
}
