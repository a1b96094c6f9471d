//! Configuration management
//!
//! Handles loading and validation of JSON configuration files. Every field
//! carries a serde default so partial files work; `Config::validate` rejects
//! invalid parameters before any simulated day runs.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::Direction;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default)]
    pub strategy: StrategyParams,
    #[serde(default)]
    pub adaptation: AdaptationConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
}

fn default_symbol() -> String {
    "SPY".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            symbol: default_symbol(),
            strategy: StrategyParams::default(),
            adaptation: AdaptationConfig::default(),
            backtest: BacktestConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.validate()?;
        self.adaptation.validate()?;
        self.backtest.validate()?;
        self.strategy.check_capital(self.initial_capital())
    }

    /// Capital allocated to the security. Defaults to room for `max_lots`
    /// full lots plus the cost of any reconstructed lots.
    pub fn initial_capital(&self) -> f64 {
        self.backtest
            .initial_capital
            .unwrap_or_else(|| self.strategy.default_capital())
    }
}

/// Reference point for grid spacing checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridReference {
    /// Candidate must be far enough from every open lot
    #[default]
    PerLot,
    /// Candidate must be far enough from the average cost
    AverageCost,
}

/// Spacing required above average cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AboveCostSpacing {
    #[default]
    Full,
    Half,
}

/// How the base grid interval scales with price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridScaling {
    #[default]
    Fixed,
    /// Interval scales with `sqrt(reference_price / price)`
    Dynamic,
}

/// Reference point for sell profitability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfitReference {
    #[default]
    PerLot,
    AverageCost,
}

/// Reference point for the individual stop-loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopLossReference {
    #[default]
    PerLot,
    AverageCost,
}

/// Execution semantics for trailing orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Buys cancel past the peak reference, sells fill only at the limit price
    #[default]
    Limit,
    Market,
}

/// Momentum toggles, independent per side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MomentumConfig {
    /// Zero buy activation, no lot cap, buys gated on positive P&L (default: false)
    #[serde(default)]
    pub buy: bool,
    /// Zero sell activation (default: false)
    #[serde(default)]
    pub sell: bool,
}

/// Stop-loss percentages. Unset levels are disabled.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StopLossConfig {
    /// Loss fraction liquidating a lot, or every lot under average-cost reference
    #[serde(default)]
    pub individual_percent: Option<f64>,
    /// Per-lot or average-cost loss (default: per_lot)
    #[serde(default)]
    pub individual_reference: StopLossReference,
    /// Aggregate loss fraction liquidating every lot
    #[serde(default)]
    pub portfolio_percent: Option<f64>,
    /// Short only: rise above the highest entry that forces a full cover
    #[serde(default)]
    pub cascade_percent: Option<f64>,
}

/// A holding imported from outside the simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialLot {
    pub price: f64,
    pub shares: f64,
    /// Purchase date (default: the first bar's date)
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// Active strategy parameter set.
///
/// The adaptive controller keeps an untouched baseline copy and rewrites the
/// active one on regime changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Long buys dips, short sells rallies (default: long)
    #[serde(default)]
    pub direction: Direction,

    /// Cash committed per buy (default: 10000)
    #[serde(default = "default_lot_size_usd")]
    pub lot_size_usd: f64,

    /// Maximum open lots, lifted by momentum buy (default: 10)
    #[serde(default = "default_max_lots")]
    pub max_lots: usize,

    /// Maximum lots consumed by one sell (default: 1)
    #[serde(default = "default_max_lots_to_sell")]
    pub max_lots_to_sell: usize,

    /// Minimum relative distance between buys (default: 0.10 = 10%)
    #[serde(default = "default_grid_interval_percent")]
    pub grid_interval_percent: f64,

    /// Minimum gain before a lot may be sold (default: 0.05 = 5%)
    #[serde(default = "default_profit_requirement")]
    pub profit_requirement: f64,

    /// Drop from the recent peak that arms a trailing buy (default: 0.10)
    #[serde(default = "default_trailing_buy_activation_percent")]
    pub trailing_buy_activation_percent: f64,

    /// Rebound from the low that fires a trailing buy (default: 0.05)
    #[serde(default = "default_trailing_buy_rebound_percent")]
    pub trailing_buy_rebound_percent: f64,

    /// Rise from the recent bottom that arms a trailing sell (default: 0.20)
    #[serde(default = "default_trailing_sell_activation_percent")]
    pub trailing_sell_activation_percent: f64,

    /// Pullback from the high that fires a trailing sell (default: 0.10)
    #[serde(default = "default_trailing_sell_pullback_percent")]
    pub trailing_sell_pullback_percent: f64,

    /// Tolerance below the stop for limit sell prices (default: 0.02)
    #[serde(default = "default_slippage_allowance")]
    pub slippage_allowance: f64,

    /// Limit or market semantics for trailing orders (default: limit)
    #[serde(default)]
    pub order_type: OrderType,

    /// Grid check against every lot or the average cost (default: per_lot)
    #[serde(default)]
    pub grid_reference: GridReference,

    /// Spacing required above average cost (default: full)
    #[serde(default)]
    pub above_cost_spacing: AboveCostSpacing,

    /// Fixed or price-scaled grid interval (default: fixed)
    #[serde(default)]
    pub grid_scaling: GridScaling,

    /// Reference price for dynamic scaling (default: first close)
    #[serde(default)]
    pub dynamic_reference_price: Option<f64>,

    /// Geometric widening per consecutive buy (default: disabled)
    #[serde(default)]
    pub grid_consecutive_increment: Option<f64>,

    /// Profit check per lot or against the average cost (default: per_lot)
    #[serde(default)]
    pub profit_reference: ProfitReference,

    /// Geometric growth per consecutive sell (default: disabled)
    #[serde(default)]
    pub profit_consecutive_increment: Option<f64>,

    #[serde(default)]
    pub momentum: MomentumConfig,

    #[serde(default)]
    pub stop_loss: StopLossConfig,

    /// Minimum days since the last buy before a new trailing buy arms (default: 0)
    #[serde(default)]
    pub entry_delay_days: i64,

    /// Buying enabled (default: true)
    #[serde(default = "default_true")]
    pub buy_enabled: bool,

    /// Selling enabled (default: true)
    #[serde(default = "default_true")]
    pub sell_enabled: bool,

    /// Holdings seeded into the ledger before day 0
    #[serde(default)]
    pub initial_lots: Vec<InitialLot>,
}

fn default_true() -> bool {
    true
}

fn default_lot_size_usd() -> f64 {
    10_000.0
}

fn default_max_lots() -> usize {
    10
}

fn default_max_lots_to_sell() -> usize {
    1
}

fn default_grid_interval_percent() -> f64 {
    0.10
}

fn default_profit_requirement() -> f64 {
    0.05
}

fn default_trailing_buy_activation_percent() -> f64 {
    0.10
}

fn default_trailing_buy_rebound_percent() -> f64 {
    0.05
}

fn default_trailing_sell_activation_percent() -> f64 {
    0.20
}

fn default_trailing_sell_pullback_percent() -> f64 {
    0.10
}

fn default_slippage_allowance() -> f64 {
    0.02
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            direction: Direction::Long,
            lot_size_usd: default_lot_size_usd(),
            max_lots: default_max_lots(),
            max_lots_to_sell: default_max_lots_to_sell(),
            grid_interval_percent: default_grid_interval_percent(),
            profit_requirement: default_profit_requirement(),
            trailing_buy_activation_percent: default_trailing_buy_activation_percent(),
            trailing_buy_rebound_percent: default_trailing_buy_rebound_percent(),
            trailing_sell_activation_percent: default_trailing_sell_activation_percent(),
            trailing_sell_pullback_percent: default_trailing_sell_pullback_percent(),
            slippage_allowance: default_slippage_allowance(),
            order_type: OrderType::Limit,
            grid_reference: GridReference::PerLot,
            above_cost_spacing: AboveCostSpacing::Full,
            grid_scaling: GridScaling::Fixed,
            dynamic_reference_price: None,
            grid_consecutive_increment: None,
            profit_reference: ProfitReference::PerLot,
            profit_consecutive_increment: None,
            momentum: MomentumConfig::default(),
            stop_loss: StopLossConfig::default(),
            entry_delay_days: 0,
            buy_enabled: true,
            sell_enabled: true,
            initial_lots: Vec::new(),
        }
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { field, value })
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { field, value })
    }
}

fn check_fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::NotAFraction { field, value })
    }
}

impl StrategyParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("lot_size_usd", self.lot_size_usd)?;
        if self.max_lots == 0 {
            return Err(ConfigError::ZeroCount { field: "max_lots" });
        }
        if self.max_lots_to_sell == 0 {
            return Err(ConfigError::ZeroCount {
                field: "max_lots_to_sell",
            });
        }
        check_non_negative("grid_interval_percent", self.grid_interval_percent)?;
        check_non_negative("profit_requirement", self.profit_requirement)?;
        check_fraction(
            "trailing_buy_activation_percent",
            self.trailing_buy_activation_percent,
        )?;
        check_fraction(
            "trailing_buy_rebound_percent",
            self.trailing_buy_rebound_percent,
        )?;
        check_fraction(
            "trailing_sell_activation_percent",
            self.trailing_sell_activation_percent,
        )?;
        check_fraction(
            "trailing_sell_pullback_percent",
            self.trailing_sell_pullback_percent,
        )?;
        check_fraction("slippage_allowance", self.slippage_allowance)?;

        if let Some(price) = self.dynamic_reference_price {
            check_positive("dynamic_reference_price", price)?;
        }
        if let Some(inc) = self.grid_consecutive_increment {
            check_non_negative("grid_consecutive_increment", inc)?;
        }
        if let Some(inc) = self.profit_consecutive_increment {
            check_non_negative("profit_consecutive_increment", inc)?;
        }
        if let Some(pct) = self.stop_loss.individual_percent {
            check_positive("stop_loss.individual_percent", pct)?;
        }
        if let Some(pct) = self.stop_loss.portfolio_percent {
            check_positive("stop_loss.portfolio_percent", pct)?;
        }
        if let Some(pct) = self.stop_loss.cascade_percent {
            check_positive("stop_loss.cascade_percent", pct)?;
        }
        if self.entry_delay_days < 0 {
            return Err(ConfigError::Negative {
                field: "entry_delay_days",
                value: self.entry_delay_days as f64,
            });
        }

        for (index, lot) in self.initial_lots.iter().enumerate() {
            let valid = |v: f64| v.is_finite() && v > 0.0;
            if !valid(lot.price) || !valid(lot.shares) {
                return Err(ConfigError::InvalidInitialLot {
                    index,
                    price: lot.price,
                    shares: lot.shares,
                });
            }
        }

        Ok(())
    }

    /// Cost of the reconstructed holdings
    pub fn seeded_cost(&self) -> f64 {
        self.initial_lots.iter().map(|l| l.price * l.shares).sum()
    }

    /// Room for `max_lots` lots plus the reconstructed holdings
    pub fn default_capital(&self) -> f64 {
        self.lot_size_usd * self.max_lots as f64 + self.seeded_cost()
    }

    /// `capital` must at least pay for the seeded lots
    pub fn check_capital(&self, capital: f64) -> Result<(), ConfigError> {
        let seeded = self.seeded_cost();
        if capital + 1e-9 < seeded {
            return Err(ConfigError::CapitalBelowSeededLots { capital, seeded });
        }
        Ok(())
    }
}

/// Adaptive controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationConfig {
    /// Run the controller (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Days between checks (default: 10)
    #[serde(default = "default_check_interval_days")]
    pub check_interval_days: usize,

    /// Bars in the classification window (default: 30)
    #[serde(default = "default_rolling_window_days")]
    pub rolling_window_days: usize,

    /// Bars required before the first check (default: 30)
    #[serde(default = "default_min_data_days")]
    pub min_data_days: usize,

    /// Minimum scenario confidence for a regime change (default: 0.7)
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Trailing calendar window for whipsaw detection (default: 90)
    #[serde(default = "default_whipsaw_window_days")]
    pub whipsaw_window_days: i64,

    /// Regime changes tolerated inside the whipsaw window (default: 3)
    #[serde(default = "default_max_regime_changes_in_window")]
    pub max_regime_changes_in_window: usize,

    /// Minimum move counted as a swing reversal (default: 0.03)
    #[serde(default = "default_swing_threshold")]
    pub swing_threshold: f64,
}

fn default_check_interval_days() -> usize {
    10
}

fn default_rolling_window_days() -> usize {
    30
}

fn default_min_data_days() -> usize {
    30
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_whipsaw_window_days() -> i64 {
    90
}

fn default_max_regime_changes_in_window() -> usize {
    3
}

fn default_swing_threshold() -> f64 {
    0.03
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_days: default_check_interval_days(),
            rolling_window_days: default_rolling_window_days(),
            min_data_days: default_min_data_days(),
            confidence_threshold: default_confidence_threshold(),
            whipsaw_window_days: default_whipsaw_window_days(),
            max_regime_changes_in_window: default_max_regime_changes_in_window(),
            swing_threshold: default_swing_threshold(),
        }
    }
}

impl AdaptationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_days == 0 {
            return Err(ConfigError::ZeroCount {
                field: "check_interval_days",
            });
        }
        if self.rolling_window_days < 2 {
            return Err(ConfigError::WindowTooShort(self.rolling_window_days));
        }
        if self.min_data_days < self.rolling_window_days {
            return Err(ConfigError::MinDataBelowWindow {
                min_data_days: self.min_data_days,
                rolling_window_days: self.rolling_window_days,
            });
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::ConfidenceOutOfRange(self.confidence_threshold));
        }
        if self.whipsaw_window_days < 1 {
            return Err(ConfigError::ZeroCount {
                field: "whipsaw_window_days",
            });
        }
        check_non_negative("swing_threshold", self.swing_threshold)
    }

    /// Whether `day_index` (0-based) is a scheduled check day
    pub fn is_check_day(&self, day_index: usize) -> bool {
        let days = day_index + 1;
        days >= self.min_data_days
            && (days - self.min_data_days) % self.check_interval_days.max(1) == 0
    }
}

/// Backtest configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Directory holding `{symbol}.csv` price files (default: "data")
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Directory for exported logs (default: "results")
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    /// Capital allocated to the security (default: lot size x max lots)
    #[serde(default)]
    pub initial_capital: Option<f64>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_results_dir() -> String {
    "results".to_string()
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
            initial_capital: None,
            start_date: None,
            end_date: None,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(capital) = self.initial_capital {
            check_positive("initial_capital", capital)?;
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(ConfigError::EmptyDateRange { start, end });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.initial_capital(), 100_000.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "symbol": "TSLA",
            "strategy": { "grid_reference": "average_cost", "momentum": { "buy": true } },
            "adaptation": { "enabled": true }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.symbol, "TSLA");
        assert_eq!(config.strategy.grid_reference, GridReference::AverageCost);
        assert!(config.strategy.momentum.buy);
        assert!(!config.strategy.momentum.sell);
        assert_eq!(config.strategy.max_lots, 10);
        assert!(config.adaptation.enabled);
        assert_eq!(config.adaptation.whipsaw_window_days, 90);
    }

    #[test]
    fn test_rejects_negative_grid() {
        let params = StrategyParams {
            grid_interval_percent: -0.1,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::Negative {
                field: "grid_interval_percent",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_min_data_below_window() {
        let adaptation = AdaptationConfig {
            min_data_days: 20,
            rolling_window_days: 30,
            ..Default::default()
        };
        assert_eq!(
            adaptation.validate(),
            Err(ConfigError::MinDataBelowWindow {
                min_data_days: 20,
                rolling_window_days: 30
            })
        );
    }

    #[test]
    fn test_rejects_threshold_and_zero_counts() {
        let adaptation = AdaptationConfig {
            confidence_threshold: 1.5,
            ..Default::default()
        };
        assert!(adaptation.validate().is_err());

        let params = StrategyParams {
            max_lots: 0,
            ..Default::default()
        };
        assert_eq!(
            params.validate(),
            Err(ConfigError::ZeroCount { field: "max_lots" })
        );
    }

    #[test]
    fn test_rejects_bad_initial_lot() {
        let params = StrategyParams {
            initial_lots: vec![InitialLot {
                price: 10.0,
                shares: 0.0,
                date: None,
            }],
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::InvalidInitialLot { index: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_capital_below_seeded_lots() {
        let mut config = Config::default();
        config.strategy.initial_lots = vec![InitialLot {
            price: 100.0,
            shares: 100.0,
            date: None,
        }];
        config.backtest.initial_capital = Some(5_000.0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::CapitalBelowSeededLots {
                capital: 5_000.0,
                seeded: 10_000.0
            })
        );

        config.backtest.initial_capital = Some(10_000.0);
        assert!(config.validate().is_ok());
        config.backtest.initial_capital = None;
        assert_eq!(config.initial_capital(), 110_000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_check_day_schedule() {
        let adaptation = AdaptationConfig::default();
        assert!(!adaptation.is_check_day(28));
        assert!(adaptation.is_check_day(29));
        assert!(!adaptation.is_check_day(30));
        assert!(adaptation.is_check_day(39));
    }

    #[test]
    fn test_policy_enum_serde() {
        let json = serde_json::to_string(&GridScaling::Dynamic).unwrap();
        assert_eq!(json, "\"dynamic\"");
        let order: OrderType = serde_json::from_str("\"market\"").unwrap();
        assert_eq!(order, OrderType::Market);
    }
}
