//! Core data types used across the simulation engine

use chrono::NaiveDate;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use thiserror::Error;

/// Validation errors for daily price bars
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BarValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive and finite: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// One trading day of price data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// Create a new bar with validation
    pub fn new(
        date: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, BarValidationError> {
        let bar = Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        };
        bar.validate()?;
        Ok(bar)
    }

    /// Bar for a close-only series: open, high and low all equal the close
    pub fn from_close(date: NaiveDate, close: f64) -> Self {
        Self {
            date,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), BarValidationError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(BarValidationError::NegativeVolume(self.volume));
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Identifier of a lot, unique within one ledger
pub type LotId = u64;

/// Transaction direction: `Buy` opens a lot, `Sell` closes one (a cover
/// when short)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// Which way the engine trades the security.
///
/// `Long` buys dips and sells rallies. `Short` mirrors every comparison: lots
/// are short entries opened after a rally and covered after a drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Long,
    Short,
}

impl Direction {
    /// P&L of `shares` entered at `entry` and marked at `price`
    pub fn pnl(self, entry: f64, price: f64, shares: f64) -> f64 {
        match self {
            Direction::Long => (price - entry) * shares,
            Direction::Short => (entry - price) * shares,
        }
    }
}

/// Where a lot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotSource {
    /// Created by an executed buy in this simulation
    #[default]
    Platform,
    /// Imported holding seeded before the first simulated day
    Reconstructed,
}

/// One discrete position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub purchase_price: f64,
    pub shares: f64,
    pub purchase_date: NaiveDate,
    #[serde(default)]
    pub source: LotSource,
}

impl Lot {
    pub fn cost_basis(&self) -> f64 {
        self.purchase_price * self.shares
    }
}

/// Stop-loss level that forced a liquidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopLossLevel {
    Individual,
    Portfolio,
    Cascade,
}

/// What caused a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeTrigger {
    TrailingStop,
    StopLoss(StopLossLevel),
}

impl std::fmt::Display for TradeTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeTrigger::TrailingStop => write!(f, "trailing_stop"),
            TradeTrigger::StopLoss(StopLossLevel::Individual) => write!(f, "stop_loss_individual"),
            TradeTrigger::StopLoss(StopLossLevel::Portfolio) => write!(f, "stop_loss_portfolio"),
            TradeTrigger::StopLoss(StopLossLevel::Cascade) => write!(f, "stop_loss_cascade"),
        }
    }
}

/// A lot touched by a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotFill {
    pub lot_id: LotId,
    pub purchase_price: f64,
    pub shares: f64,
    pub realized_pnl: f64,
}

/// Executed buy or sell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub date: NaiveDate,
    pub day_index: usize,
    pub side: Side,
    pub trigger: TradeTrigger,
    pub price: f64,
    pub shares: f64,
    /// Buys list the lot they created, sells the lots they consumed
    pub lots: Vec<LotFill>,
    pub realized_pnl: f64,
}

impl Transaction {
    pub fn value(&self) -> f64 {
        self.price * self.shares
    }
}

/// Why a triggered buy did not execute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum BlockReason {
    LotLimit { max_lots: usize },
    GridSpacing { grid_size: f64 },
    MomentumPnl { unrealized_pnl: f64 },
    CapitalExhausted { requested: f64, available: f64 },
}

/// A buy that reached its stop price but was refused by a gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedBuy {
    pub date: NaiveDate,
    pub day_index: usize,
    pub price: f64,
    #[serde(flatten)]
    pub reason: BlockReason,
}

/// End-of-day portfolio state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub price: f64,
    pub total_shares: f64,
    pub cost_basis: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub value: f64,
}

/// Run statistics derived from the transaction, adaptation and equity logs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub initial_capital: f64,
    pub final_value: f64,
    /// Percent
    pub total_return: f64,
    /// Percent of sells closed at a profit
    pub win_rate: f64,
    /// Percent, peak to trough of the equity curve
    pub max_drawdown: f64,
    pub regime_changes: usize,
    /// Days per adopted regime
    pub average_regime_duration: f64,
    pub whipsaw_warnings: usize,
    pub total_buys: usize,
    pub total_sells: usize,
    pub avg_buy_price: f64,
    pub avg_sell_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub final_shares: f64,
    pub open_lots: usize,
    pub peak_capital_deployed: f64,
    pub blocked_buys: usize,
}

/// Decimal accumulator for capital and realized P&L.
///
/// Prices and share counts stay `f64`; sums that run over thousands of lots
/// go through `Money` so they do not drift.
///
/// ```
/// use dca_grid_engine::Money;
/// let mut pnl = Money::ZERO;
/// pnl += Money::from_f64(0.1);
/// pnl += Money::from_f64(0.2);
/// assert_eq!(pnl.to_f64(), 0.3);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Non-finite input maps to zero
    pub fn from_f64(value: f64) -> Self {
        Money(Decimal::from_f64(value).unwrap_or(Decimal::ZERO))
    }

    pub fn to_f64(self) -> f64 {
        ToPrimitive::to_f64(&self.0).unwrap_or(0.0)
    }

    pub fn from_decimal(value: Decimal) -> Self {
        Money(value)
    }

    pub fn round_dp(self, dp: u32) -> Self {
        Money(self.0.round_dp(dp))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Money(self.0 - rhs.0)
    }
}
