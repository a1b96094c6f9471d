//! Error types for configuration and the simulation engine

use chrono::NaiveDate;
use thiserror::Error;

use crate::engine::StateSnapshot;
use crate::{BarValidationError, LotId};

/// Invalid strategy or adaptation parameters, rejected before day 0
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be positive and finite, got {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} must be a fraction in [0, 1), got {value}")]
    NotAFraction { field: &'static str, value: f64 },

    #[error("{field} must be at least 1")]
    ZeroCount { field: &'static str },

    #[error("rolling_window_days must be at least 2, got {0}")]
    WindowTooShort(usize),

    #[error("min_data_days ({min_data_days}) must be >= rolling_window_days ({rolling_window_days})")]
    MinDataBelowWindow {
        min_data_days: usize,
        rolling_window_days: usize,
    },

    #[error("confidence_threshold must be within [0, 1], got {0}")]
    ConfidenceOutOfRange(f64),

    #[error("initial lot #{index} must have positive price and shares (price={price}, shares={shares})")]
    InvalidInitialLot {
        index: usize,
        price: f64,
        shares: f64,
    },

    #[error("initial capital {capital:.2} does not cover the seeded lots ({seeded:.2})")]
    CapitalBelowSeededLots { capital: f64, seeded: f64 },

    #[error("start_date {start} is after end_date {end}")]
    EmptyDateRange { start: NaiveDate, end: NaiveDate },
}

/// Ledger mutations that reference missing lots or shares
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("lot {0} is not open")]
    UnknownLot(LotId),

    #[error("lot {lot_id} holds {available} shares, cannot remove {requested}")]
    InsufficientShares {
        lot_id: LotId,
        requested: f64,
        available: f64,
    },

    #[error("share quantity must be positive and finite, got {0}")]
    InvalidQuantity(f64),
}

/// Errors surfaced by the daily step function and the controller
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Recoverable: the adaptation check for the day is skipped
    #[error("insufficient data: {required} bars required, {available} available")]
    InsufficientData { required: usize, available: usize },

    /// Recoverable: the buy is skipped and logged as blocked
    #[error("capital exhausted: requested {requested:.2}, available {available:.2}")]
    CapitalExhausted { requested: f64, available: f64 },

    #[error("invalid bar on day {day_index} ({date}): {reason}")]
    InvalidBar {
        day_index: usize,
        date: NaiveDate,
        reason: BarValidationError,
        snapshot: Box<StateSnapshot>,
    },

    #[error("bar on day {day_index} dated {date} does not follow previous bar {previous}")]
    OutOfOrderBar {
        day_index: usize,
        date: NaiveDate,
        previous: NaiveDate,
        snapshot: Box<StateSnapshot>,
    },
}

impl EngineError {
    /// Whether the run may continue past this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientData { .. } | EngineError::CapitalExhausted { .. }
        )
    }

    /// State captured at the failing day, for unrecoverable errors
    pub fn snapshot(&self) -> Option<&StateSnapshot> {
        match self {
            EngineError::InvalidBar { snapshot, .. } | EngineError::OutOfOrderBar { snapshot, .. } => {
                Some(snapshot)
            }
            _ => None,
        }
    }
}
