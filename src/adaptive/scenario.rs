//! Market scenario classification and per-scenario parameter multipliers

use serde::{Deserialize, Serialize};

use crate::config::StrategyParams;
use crate::indicators;
use crate::{PriceBar, Side, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    OscillatingUptrend,
    Downtrend,
    FastRally,
    Mixed,
}

impl ScenarioKind {
    pub fn confidence(self) -> f64 {
        match self {
            ScenarioKind::Downtrend => 0.85,
            ScenarioKind::FastRally => 0.80,
            ScenarioKind::OscillatingUptrend => 0.75,
            ScenarioKind::Mixed => 0.50,
        }
    }

    pub fn multipliers(self) -> ParameterMultipliers {
        match self {
            // Tighter grid and cheaper exits to harvest swings
            ScenarioKind::OscillatingUptrend => ParameterMultipliers {
                grid_interval: 0.80,
                profit_requirement: 0.80,
                buy_activation: 0.80,
                buy_rebound: 1.00,
                sell_activation: 0.80,
                sell_pullback: 1.00,
                lot_size: 1.00,
                max_lots: 1.00,
            },
            // Wider spacing, smaller and fewer lots
            ScenarioKind::Downtrend => ParameterMultipliers {
                grid_interval: 1.50,
                profit_requirement: 1.25,
                buy_activation: 1.50,
                buy_rebound: 1.20,
                sell_activation: 1.00,
                sell_pullback: 0.80,
                lot_size: 0.75,
                max_lots: 0.70,
            },
            // Enter faster, let winners run
            ScenarioKind::FastRally => ParameterMultipliers {
                grid_interval: 1.00,
                profit_requirement: 1.50,
                buy_activation: 0.50,
                buy_rebound: 0.60,
                sell_activation: 1.50,
                sell_pullback: 1.50,
                lot_size: 1.25,
                max_lots: 1.00,
            },
            ScenarioKind::Mixed => ParameterMultipliers::identity(),
        }
    }
}

impl std::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScenarioKind::OscillatingUptrend => "oscillating_uptrend",
            ScenarioKind::Downtrend => "downtrend",
            ScenarioKind::FastRally => "fast_rally",
            ScenarioKind::Mixed => "mixed",
        };
        f.write_str(name)
    }
}

/// Multipliers applied to the baseline parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterMultipliers {
    pub grid_interval: f64,
    pub profit_requirement: f64,
    pub buy_activation: f64,
    pub buy_rebound: f64,
    pub sell_activation: f64,
    pub sell_pullback: f64,
    pub lot_size: f64,
    pub max_lots: f64,
}

/// Trailing percentages stay below 1 after scaling
const MAX_TRAILING_PERCENT: f64 = 0.95;

impl ParameterMultipliers {
    pub fn identity() -> Self {
        Self {
            grid_interval: 1.0,
            profit_requirement: 1.0,
            buy_activation: 1.0,
            buy_rebound: 1.0,
            sell_activation: 1.0,
            sell_pullback: 1.0,
            lot_size: 1.0,
            max_lots: 1.0,
        }
    }

    /// Scale `baseline` into `current`, leaving unscaled fields of `current` alone
    pub fn apply(&self, baseline: &StrategyParams, current: &StrategyParams) -> StrategyParams {
        let trailing = |v: f64, m: f64| (v * m).min(MAX_TRAILING_PERCENT);
        StrategyParams {
            grid_interval_percent: baseline.grid_interval_percent * self.grid_interval,
            profit_requirement: baseline.profit_requirement * self.profit_requirement,
            trailing_buy_activation_percent: trailing(
                baseline.trailing_buy_activation_percent,
                self.buy_activation,
            ),
            trailing_buy_rebound_percent: trailing(
                baseline.trailing_buy_rebound_percent,
                self.buy_rebound,
            ),
            trailing_sell_activation_percent: trailing(
                baseline.trailing_sell_activation_percent,
                self.sell_activation,
            ),
            trailing_sell_pullback_percent: trailing(
                baseline.trailing_sell_pullback_percent,
                self.sell_pullback,
            ),
            lot_size_usd: baseline.lot_size_usd * self.lot_size,
            max_lots: ((baseline.max_lots as f64 * self.max_lots).round() as usize).max(1),
            ..current.clone()
        }
    }
}

/// Measures of one rolling window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub days: usize,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub volatility: f64,
    pub up_day_ratio: f64,
    pub swing_reversals: usize,
    pub buys: usize,
    pub sells: usize,
}

impl WindowMetrics {
    /// `first_day_index` is the day index of `window[0]`
    pub fn measure(
        window: &[PriceBar],
        first_day_index: usize,
        transactions: &[Transaction],
        swing_threshold: f64,
    ) -> Self {
        let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
        let returns = indicators::daily_returns(&closes);
        let in_window = transactions.iter().filter(|t| t.day_index >= first_day_index);
        let (buys, sells) = in_window.fold((0, 0), |(b, s), t| match t.side {
            Side::Buy => (b + 1, s),
            Side::Sell => (b, s + 1),
        });

        Self {
            days: window.len(),
            total_return: indicators::total_return(&closes),
            max_drawdown: indicators::max_drawdown(&closes),
            volatility: indicators::volatility(&returns),
            up_day_ratio: indicators::up_day_ratio(&returns),
            swing_reversals: indicators::swing_reversals(&closes, swing_threshold),
            buys,
            sells,
        }
    }
}

/// Classification result recorded in every adaptation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedScenario {
    pub kind: ScenarioKind,
    pub confidence: f64,
    pub metrics: WindowMetrics,
}

/// First matching rule wins
pub fn classify(metrics: WindowMetrics) -> DetectedScenario {
    let kind = if metrics.total_return <= -0.10
        || (metrics.total_return < 0.0 && metrics.max_drawdown >= 0.15)
    {
        ScenarioKind::Downtrend
    } else if metrics.total_return >= 0.15 && metrics.max_drawdown < 0.05 && metrics.buys <= 1 {
        ScenarioKind::FastRally
    } else if metrics.total_return > 0.0 && metrics.swing_reversals >= 3 {
        ScenarioKind::OscillatingUptrend
    } else {
        ScenarioKind::Mixed
    };

    DetectedScenario {
        kind,
        confidence: kind.confidence(),
        metrics,
    }
}
