//! Local peak and trough since the last executed transaction

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtremumState {
    pub recent_peak: f64,
    pub peak_date: NaiveDate,
    pub recent_bottom: f64,
    pub bottom_date: NaiveDate,
}

/// Tracks the recent peak and bottom.
///
/// `reset` runs once per executed transaction, `update` once per simulated
/// day. Between resets the peak only rises and the bottom only falls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtremumTracker {
    state: Option<ExtremumState>,
}

impl ExtremumTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, price: f64, date: NaiveDate) {
        self.state = Some(ExtremumState {
            recent_peak: price,
            peak_date: date,
            recent_bottom: price,
            bottom_date: date,
        });
    }

    /// Extend the extremes. Dates move only on strict improvement.
    pub fn update(&mut self, price: f64, date: NaiveDate) {
        match self.state.as_mut() {
            None => self.reset(price, date),
            Some(state) => {
                if price > state.recent_peak {
                    state.recent_peak = price;
                    state.peak_date = date;
                }
                if price < state.recent_bottom {
                    state.recent_bottom = price;
                    state.bottom_date = date;
                }
            }
        }
    }

    pub fn state(&self) -> Option<&ExtremumState> {
        self.state.as_ref()
    }

    pub fn recent_peak(&self) -> Option<f64> {
        self.state.map(|s| s.recent_peak)
    }

    pub fn recent_bottom(&self) -> Option<f64> {
        self.state.map(|s| s.recent_bottom)
    }
}
