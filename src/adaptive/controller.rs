//! Adaptive strategy controller

use std::collections::{BTreeMap, VecDeque};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::scenario::{classify, DetectedScenario, ScenarioKind, WindowMetrics};
use crate::config::{AdaptationConfig, StrategyParams};
use crate::error::EngineError;
use crate::{PriceBar, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterChange {
    pub from: f64,
    pub to: f64,
}

/// Immutable record of one scheduled check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationEvent {
    pub date: NaiveDate,
    pub day_index: usize,
    pub scenario: DetectedScenario,
    /// Empty unless the check was a regime change
    pub parameter_changes: BTreeMap<String, ParameterChange>,
    pub regime_change: bool,
    pub whipsaw_warning: bool,
}

/// Counts regime changes inside a trailing calendar window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhipsawMonitor {
    window_days: i64,
    max_changes: usize,
    changes: VecDeque<NaiveDate>,
}

impl WhipsawMonitor {
    pub fn new(window_days: i64, max_changes: usize) -> Self {
        Self {
            window_days,
            max_changes,
            changes: VecDeque::new(),
        }
    }

    /// Record a change and report whether the window now holds too many.
    /// The window covers `date - window_days ..= date`.
    pub fn record(&mut self, date: NaiveDate) -> bool {
        self.changes.push_back(date);
        while let Some(&oldest) = self.changes.front() {
            if (date - oldest).num_days() > self.window_days {
                self.changes.pop_front();
            } else {
                break;
            }
        }
        self.changes.len() > self.max_changes
    }

    pub fn changes_in_window(&self) -> usize {
        self.changes.len()
    }
}

/// Reclassifies the recent window on a fixed cadence and rescales the
/// active parameters from an immutable baseline on regime changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveController {
    config: AdaptationConfig,
    baseline: Option<StrategyParams>,
    active: Option<ScenarioKind>,
    whipsaw: WhipsawMonitor,
}

impl AdaptiveController {
    pub fn new(config: AdaptationConfig) -> Self {
        let whipsaw =
            WhipsawMonitor::new(config.whipsaw_window_days, config.max_regime_changes_in_window);
        Self {
            config,
            baseline: None,
            active: None,
            whipsaw,
        }
    }

    pub fn config(&self) -> &AdaptationConfig {
        &self.config
    }

    pub fn is_due(&self, day_index: usize) -> bool {
        self.config.enabled && self.config.is_check_day(day_index)
    }

    pub fn baseline(&self) -> Option<&StrategyParams> {
        self.baseline.as_ref()
    }

    pub fn active_scenario(&self) -> Option<ScenarioKind> {
        self.active
    }

    /// Run one check on day `day_index` over `history[..=day_index]`.
    ///
    /// Returns `InsufficientData` when fewer than `rolling_window_days` bars
    /// exist; the caller skips the check for that day.
    pub fn check(
        &mut self,
        day_index: usize,
        history: &[PriceBar],
        transactions: &[Transaction],
        params: &mut StrategyParams,
    ) -> Result<AdaptationEvent, EngineError> {
        let window_len = self.config.rolling_window_days;
        let available = history.len().min(day_index + 1);
        if available < window_len {
            return Err(EngineError::InsufficientData {
                required: window_len,
                available,
            });
        }

        let start = available - window_len;
        let window = &history[start..available];
        let date = window[window_len - 1].date;

        let baseline = self.baseline.get_or_insert_with(|| params.clone()).clone();
        let metrics =
            WindowMetrics::measure(window, start, transactions, self.config.swing_threshold);
        let scenario = classify(metrics);

        let regime_change = Some(scenario.kind) != self.active
            && scenario.confidence >= self.config.confidence_threshold;

        let mut parameter_changes = BTreeMap::new();
        let mut whipsaw_warning = false;

        if regime_change {
            let adjusted = scenario.kind.multipliers().apply(&baseline, params);
            parameter_changes = diff_params(params, &adjusted);
            *params = adjusted;

            info!(
                day = day_index,
                date = %date,
                from = ?self.active,
                to = %scenario.kind,
                confidence = format!("{:.2}", scenario.confidence),
                changes = parameter_changes.len(),
                "Regime change"
            );
            self.active = Some(scenario.kind);

            whipsaw_warning = self.whipsaw.record(date);
            if whipsaw_warning {
                warn!(
                    date = %date,
                    changes = self.whipsaw.changes_in_window(),
                    window_days = self.config.whipsaw_window_days,
                    "Whipsaw: regime classification is unstable"
                );
            }
        } else {
            debug!(
                day = day_index,
                detected = %scenario.kind,
                confidence = format!("{:.2}", scenario.confidence),
                active = ?self.active,
                "Adaptation check, no regime change"
            );
        }

        Ok(AdaptationEvent {
            date,
            day_index,
            scenario,
            parameter_changes,
            regime_change,
            whipsaw_warning,
        })
    }
}

/// `{field: {from, to}}` for the fields the controller rescales
fn diff_params(
    before: &StrategyParams,
    after: &StrategyParams,
) -> BTreeMap<String, ParameterChange> {
    let fields = [
        (
            "grid_interval_percent",
            before.grid_interval_percent,
            after.grid_interval_percent,
        ),
        (
            "profit_requirement",
            before.profit_requirement,
            after.profit_requirement,
        ),
        (
            "trailing_buy_activation_percent",
            before.trailing_buy_activation_percent,
            after.trailing_buy_activation_percent,
        ),
        (
            "trailing_buy_rebound_percent",
            before.trailing_buy_rebound_percent,
            after.trailing_buy_rebound_percent,
        ),
        (
            "trailing_sell_activation_percent",
            before.trailing_sell_activation_percent,
            after.trailing_sell_activation_percent,
        ),
        (
            "trailing_sell_pullback_percent",
            before.trailing_sell_pullback_percent,
            after.trailing_sell_pullback_percent,
        ),
        ("lot_size_usd", before.lot_size_usd, after.lot_size_usd),
        ("max_lots", before.max_lots as f64, after.max_lots as f64),
    ];

    fields
        .into_iter()
        .filter(|(_, from, to)| from != to)
        .map(|(name, from, to)| (name.to_string(), ParameterChange { from, to }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn series(closes: &[f64]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar::from_close(start + Duration::days(i as i64), c))
            .collect()
    }

    fn linear(from: f64, to: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| from + (to - from) * i as f64 / (n - 1) as f64)
            .collect()
    }

    fn config(window: usize) -> AdaptationConfig {
        AdaptationConfig {
            enabled: true,
            check_interval_days: window,
            rolling_window_days: window,
            min_data_days: window,
            ..Default::default()
        }
    }

    #[test]
    fn test_insufficient_data() {
        let mut controller = AdaptiveController::new(config(30));
        let history = series(&[100.0; 10]);
        let mut params = StrategyParams::default();
        let result = controller.check(9, &history, &[], &mut params);
        assert!(matches!(
            result,
            Err(EngineError::InsufficientData {
                required: 30,
                available: 10
            })
        ));
        assert!(controller.baseline().is_none());
    }

    #[test]
    fn test_regime_change_rewrites_params() {
        let mut controller = AdaptiveController::new(config(30));
        let history = series(&linear(100.0, 80.0, 30));
        let mut params = StrategyParams::default();

        let event = controller.check(29, &history, &[], &mut params).unwrap();
        assert!(event.regime_change);
        assert_eq!(event.scenario.kind, ScenarioKind::Downtrend);
        assert_relative_eq!(params.lot_size_usd, 7_500.0);
        let change = &event.parameter_changes["max_lots"];
        assert_eq!((change.from, change.to), (10.0, 7.0));
        assert!(!event.parameter_changes.contains_key("trailing_sell_activation_percent"));

        // same scenario again: logged, nothing rewritten
        let again = controller.check(29, &history, &[], &mut params).unwrap();
        assert!(!again.regime_change);
        assert!(again.parameter_changes.is_empty());
        assert_relative_eq!(params.lot_size_usd, 7_500.0);
        assert_eq!(controller.baseline().unwrap().lot_size_usd, 10_000.0);
    }

    #[test]
    fn test_below_threshold_never_changes() {
        let mut controller = AdaptiveController::new(AdaptationConfig {
            confidence_threshold: 0.9,
            ..config(30)
        });
        let history = series(&linear(100.0, 80.0, 30));
        let mut params = StrategyParams::default();
        let event = controller.check(29, &history, &[], &mut params).unwrap();
        assert!(!event.regime_change);
        assert_eq!(params, StrategyParams::default());
        assert_eq!(controller.active_scenario(), None);
    }

    #[test]
    fn test_whipsaw_monitor_window() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut monitor = WhipsawMonitor::new(90, 3);
        assert!(!monitor.record(start));
        assert!(!monitor.record(start + Duration::days(30)));
        assert!(!monitor.record(start + Duration::days(60)));
        assert!(monitor.record(start + Duration::days(90)));
        // the first change ages out
        assert!(monitor.record(start + Duration::days(120)));
        assert!(!monitor.record(start + Duration::days(250)));
    }
}
