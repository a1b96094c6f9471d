//! Trailing-stop state machines
//!
//! Idle is represented by the absence of an order. `try_activate` creates
//! an order, `update` trails or fires it, and the engine drops it on
//! execution or cancellation.
//!
//! For a long book the buy order arms after a drop from the recent peak and
//! fires on a rebound, the sell order arms after a rise from the recent
//! bottom and fires on a pullback. A short book mirrors every comparison.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::OrderType;
use crate::extremum::ExtremumState;
use crate::{Direction, LotId};

/// Outcome of a daily update of an active order
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrailingUpdate {
    Hold,
    Trailed { from: f64, to: f64 },
    Triggered,
    Cancelled,
}

/// Whether a triggered sell can execute today
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillDecision {
    Fill,
    /// Limit not reachable yet, order stays active
    Wait,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingBuyOrder {
    pub stop_price: f64,
    /// Recent peak at activation (recent bottom when short)
    pub reference_price: f64,
    pub activated_date: NaiveDate,
    pub last_update_price: f64,
}

impl TrailingBuyOrder {
    /// Arm a buy if price has moved `activation` away from the anchor extreme
    pub fn try_activate(
        direction: Direction,
        price: f64,
        date: NaiveDate,
        extremes: &ExtremumState,
        activation: f64,
        rebound: f64,
    ) -> Option<Self> {
        let (armed, reference, stop_price) = match direction {
            Direction::Long => (
                price <= extremes.recent_peak * (1.0 - activation),
                extremes.recent_peak,
                price * (1.0 + rebound),
            ),
            Direction::Short => (
                price >= extremes.recent_bottom * (1.0 + activation),
                extremes.recent_bottom,
                price * (1.0 - rebound),
            ),
        };

        armed.then_some(Self {
            stop_price,
            reference_price: reference,
            activated_date: date,
            last_update_price: price,
        })
    }

    /// Cancel (limit only), fire, or trail the stop toward the price
    pub fn update(
        &mut self,
        direction: Direction,
        price: f64,
        rebound: f64,
        order_type: OrderType,
    ) -> TrailingUpdate {
        self.last_update_price = price;

        let (escaped, reached, candidate) = match direction {
            Direction::Long => (
                price > self.reference_price,
                price >= self.stop_price,
                price * (1.0 + rebound),
            ),
            Direction::Short => (
                price < self.reference_price,
                price <= self.stop_price,
                price * (1.0 - rebound),
            ),
        };

        if order_type == OrderType::Limit && escaped {
            return TrailingUpdate::Cancelled;
        }
        if reached {
            return TrailingUpdate::Triggered;
        }

        let tighter = match direction {
            Direction::Long => candidate < self.stop_price,
            Direction::Short => candidate > self.stop_price,
        };
        if tighter {
            let from = self.stop_price;
            self.stop_price = candidate;
            return TrailingUpdate::Trailed { from, to: candidate };
        }
        TrailingUpdate::Hold
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingSellOrder {
    pub stop_price: f64,
    /// Recent bottom at activation (recent peak when short)
    pub reference_price: f64,
    pub activated_date: NaiveDate,
    pub last_update_price: f64,
    /// Lots eligible when the order armed
    pub lot_ids: Vec<LotId>,
}

impl TrailingSellOrder {
    /// Arm a sell over `lot_ids` if price has moved `activation` away from the anchor
    pub fn try_activate(
        direction: Direction,
        price: f64,
        date: NaiveDate,
        extremes: &ExtremumState,
        activation: f64,
        pullback: f64,
        lot_ids: Vec<LotId>,
    ) -> Option<Self> {
        if lot_ids.is_empty() {
            return None;
        }
        let (armed, reference, stop_price) = match direction {
            Direction::Long => (
                price >= extremes.recent_bottom * (1.0 + activation),
                extremes.recent_bottom,
                price * (1.0 - pullback),
            ),
            Direction::Short => (
                price <= extremes.recent_peak * (1.0 - activation),
                extremes.recent_peak,
                price * (1.0 + pullback),
            ),
        };

        armed.then_some(Self {
            stop_price,
            reference_price: reference,
            activated_date: date,
            last_update_price: price,
            lot_ids,
        })
    }

    /// Fire when price crosses the stop, otherwise trail it
    pub fn update(&mut self, direction: Direction, price: f64, pullback: f64) -> TrailingUpdate {
        self.last_update_price = price;

        let (reached, candidate) = match direction {
            Direction::Long => (price <= self.stop_price, price * (1.0 - pullback)),
            Direction::Short => (price >= self.stop_price, price * (1.0 + pullback)),
        };
        if reached {
            return TrailingUpdate::Triggered;
        }

        let tighter = match direction {
            Direction::Long => candidate > self.stop_price,
            Direction::Short => candidate < self.stop_price,
        };
        if tighter {
            let from = self.stop_price;
            self.stop_price = candidate;
            return TrailingUpdate::Trailed { from, to: candidate };
        }
        TrailingUpdate::Hold
    }

    /// Decide a triggered order. `limit_price` is `None` when none of the
    /// recorded lots is still eligible.
    pub fn fill_decision(
        &self,
        direction: Direction,
        price: f64,
        order_type: OrderType,
        limit_price: Option<f64>,
    ) -> FillDecision {
        let Some(limit) = limit_price else {
            return FillDecision::Cancel;
        };
        if order_type == OrderType::Market {
            return FillDecision::Fill;
        }

        let (fills, escaped) = match direction {
            Direction::Long => (price >= limit, price < self.reference_price),
            Direction::Short => (price <= limit, price > self.reference_price),
        };
        if fills {
            FillDecision::Fill
        } else if escaped {
            FillDecision::Cancel
        } else {
            FillDecision::Wait
        }
    }
}
