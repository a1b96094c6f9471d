//! Integration tests for the DCA grid engine
//!
//! These tests drive the daily step function and the backtest driver end to
//! end on synthetic price series.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use chrono::{Duration, NaiveDate};

use dca_grid_engine::adaptive::{AdaptiveController, ScenarioKind};
use dca_grid_engine::backtest::{compare_adaptation, run_batch, summarize, Backtester};
use dca_grid_engine::capital::{CapitalAllocator, FixedCapitalPool};
use dca_grid_engine::config::{
    AdaptationConfig, GridReference, MomentumConfig, OrderType, ProfitReference, StopLossConfig,
    StrategyParams,
};
use dca_grid_engine::engine::{advance_day, SimulationContext};
use dca_grid_engine::grid::{average_cost_spacing_ok, GridPolicy};
use dca_grid_engine::ledger::LotLedger;
use dca_grid_engine::profit::ProfitPolicy;
use dca_grid_engine::{
    export, BlockReason, Config, Direction, EngineError, LotSource, PriceBar, Side,
    StopLossLevel, TradeTrigger,
};

// =============================================================================
// Test Utilities
// =============================================================================

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
}

/// Close-only bars on consecutive calendar days
fn bars_from_closes(closes: &[f64]) -> Vec<PriceBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| PriceBar::from_close(start_date() + Duration::days(i as i64), c))
        .collect()
}

/// Bars opening at the previous close with an intraday range of `spread`
fn bars_with_range(closes: &[f64], spread: f64) -> Vec<PriceBar> {
    let mut prev = closes.first().copied().unwrap_or(100.0);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = prev;
            prev = close;
            PriceBar::new(
                start_date() + Duration::days(i as i64),
                open,
                open.max(close) * (1.0 + spread),
                open.min(close) * (1.0 - spread),
                close,
                1_000.0,
            )
            .unwrap()
        })
        .collect()
}

/// Straight line from `from` to `to` over `n` closes
fn linear_closes(from: f64, to: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| from + (to - from) * i as f64 / (n - 1) as f64)
        .collect()
}

/// Sine wave around a drifting base
fn generate_oscillating_closes(
    count: usize,
    base: f64,
    amplitude: f64,
    period: f64,
    daily_drift: f64,
) -> Vec<f64> {
    (0..count)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / period;
            base * (1.0 + daily_drift * i as f64) * (1.0 + amplitude * phase.sin())
        })
        .collect()
}

/// Downtrend, recovery rally, then a choppy uptrend
fn generate_regime_closes() -> Vec<f64> {
    let mut closes = linear_closes(100.0, 70.0, 40);
    closes.extend(linear_closes(70.0, 100.0, 30).into_iter().skip(1));
    closes.extend(generate_oscillating_closes(90, 100.0, 0.06, 12.0, 0.002));
    closes
}

fn market_params() -> StrategyParams {
    StrategyParams {
        order_type: OrderType::Market,
        ..Default::default()
    }
}

fn run_context(
    params: StrategyParams,
    adaptation: AdaptationConfig,
    bars: &[PriceBar],
) -> (SimulationContext, FixedCapitalPool) {
    let capital = params.default_capital();
    let mut ctx = SimulationContext::new("TEST", params, adaptation, capital).unwrap();
    let mut pool = FixedCapitalPool::new(capital);
    for bar in bars {
        advance_day(&mut ctx, bar.clone(), &mut pool).unwrap();
    }
    (ctx, pool)
}

fn ledger_at(prices: &[f64]) -> LotLedger {
    let mut ledger = LotLedger::new(Direction::Long);
    for &p in prices {
        ledger
            .add_lot(p, 1_000.0 / p, start_date(), LotSource::Platform)
            .unwrap();
    }
    ledger
}

// =============================================================================
// Determinism and Conservation
// =============================================================================

#[test]
fn test_repeated_runs_are_byte_identical() {
    let bars = bars_with_range(&generate_regime_closes(), 0.01);
    let mut config = Config::default();
    config.adaptation.enabled = true;
    config.strategy.momentum.buy = true;

    let first = Backtester::new(config.clone()).run(&bars).unwrap();
    let second = Backtester::new(config).run(&bars).unwrap();

    assert!(!first.adaptation_events.is_empty());
    assert_eq!(
        serde_json::to_string(&first.transactions).unwrap(),
        serde_json::to_string(&second.transactions).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&first.adaptation_events).unwrap(),
        serde_json::to_string(&second.adaptation_events).unwrap()
    );
}

#[test]
fn test_shares_conserved_every_day() {
    let bars = bars_from_closes(&generate_oscillating_closes(200, 100.0, 0.15, 20.0, 0.0));
    let params = market_params();
    let capital = params.default_capital();
    let mut ctx = SimulationContext::new("TEST", params, AdaptationConfig::default(), capital).unwrap();
    let mut pool = FixedCapitalPool::new(capital);

    for bar in bars {
        advance_day(&mut ctx, bar, &mut pool).unwrap();

        let bought: f64 = ctx
            .transactions()
            .iter()
            .filter(|t| t.side == Side::Buy)
            .map(|t| t.shares)
            .sum();
        let sold: f64 = ctx
            .transactions()
            .iter()
            .filter(|t| t.side == Side::Sell)
            .map(|t| t.shares)
            .sum();
        assert_abs_diff_eq!(ctx.ledger().total_shares(), bought - sold, epsilon = 1e-6);
        assert!(ctx.ledger().lots().iter().all(|l| l.shares > 0.0));
        assert_abs_diff_eq!(pool.deployed(), ctx.ledger().cost_basis(), epsilon = 1e-4);
    }

    let buys = ctx.transactions().iter().filter(|t| t.side == Side::Buy).count();
    let sells = ctx.transactions().iter().filter(|t| t.side == Side::Sell).count();
    assert!(buys > 0);
    assert!(sells > 0);
}

#[test]
fn test_equity_is_capital_plus_pnl() {
    let bars = bars_from_closes(&generate_oscillating_closes(120, 50.0, 0.12, 15.0, 0.001));
    let (ctx, pool) = run_context(market_params(), AdaptationConfig::default(), &bars);

    for point in ctx.equity_curve() {
        assert_relative_eq!(
            point.value,
            ctx.initial_capital() + point.realized_pnl + point.unrealized_pnl,
            epsilon = 1e-6
        );
    }
    let last = ctx.equity_curve().last().unwrap();
    let cash = pool.available() + last.realized_pnl;
    assert_relative_eq!(last.value, cash + last.cost_basis + last.unrealized_pnl, epsilon = 1e-4);
}

// =============================================================================
// Grid and Profit Evaluators
// =============================================================================

#[test]
fn test_average_cost_grid_blocks_inside_spacing() {
    let ledger = ledger_at(&[50.0]);
    let policy = GridPolicy::from_params(&StrategyParams {
        grid_reference: GridReference::AverageCost,
        grid_interval_percent: 0.10,
        ..Default::default()
    });
    let size = policy.effective_size(44.0, None, 0);
    assert!(policy.admits(&ledger, 44.0, size));
    assert!(!policy.admits(&ledger, 46.0, size));
}

#[test]
fn test_average_cost_sell_is_all_or_nothing() {
    let ledger = ledger_at(&[45.0, 55.0]);
    let policy = ProfitPolicy::from_params(&StrategyParams {
        profit_reference: ProfitReference::AverageCost,
        profit_requirement: 0.10,
        ..Default::default()
    });
    // equal cash per lot skews the average toward the cheaper lot
    let average = ledger.average_cost();
    assert!(average < 50.0);

    let balanced = {
        let mut l = LotLedger::new(Direction::Long);
        l.add_lot(45.0, 10.0, start_date(), LotSource::Platform).unwrap();
        l.add_lot(55.0, 10.0, start_date(), LotSource::Platform).unwrap();
        l
    };
    assert_relative_eq!(balanced.average_cost(), 50.0);
    let req = policy.effective_requirement(0);
    assert_eq!(policy.eligible_lots(&balanced, 56.0, req).len(), 2);
    assert!(policy.eligible_lots(&balanced, 54.0, req).is_empty());
}

#[test]
fn test_empty_ledger_grid_always_admissible() {
    let ledger = LotLedger::new(Direction::Long);
    for reference in [GridReference::PerLot, GridReference::AverageCost] {
        let policy = GridPolicy::from_params(&StrategyParams {
            grid_reference: reference,
            grid_interval_percent: 0.5,
            ..Default::default()
        });
        for price in [0.5, 1.0, 99.0, 12_345.0] {
            assert!(policy.admits(&ledger, price, 0.5));
        }
    }
}

#[test]
fn test_grid_monotonic_in_size() {
    let ledgers = [
        ledger_at(&[50.0]),
        ledger_at(&[100.0, 80.0, 64.0]),
        ledger_at(&[10.0, 12.0]),
    ];
    for ledger in &ledgers {
        let average = ledger.average_cost();
        for step in 0..=40 {
            let price = average * (0.6 + step as f64 * 0.02);
            let mut last_admitted = false;
            for grid in [0.40, 0.25, 0.15, 0.10, 0.07, 0.03, 0.0] {
                let admitted = average_cost_spacing_ok(
                    ledger,
                    price,
                    grid,
                    dca_grid_engine::config::AboveCostSpacing::Full,
                );
                assert!(!last_admitted || admitted);
                last_admitted = admitted;
            }
        }
    }
}

// =============================================================================
// Momentum Gate
// =============================================================================

#[test]
fn test_momentum_first_buy_exempt_then_gated() {
    let params = StrategyParams {
        momentum: MomentumConfig {
            buy: true,
            sell: false,
        },
        grid_interval_percent: 0.0,
        ..market_params()
    };
    let bars = bars_from_closes(&[100.0, 90.0, 80.0, 85.0, 80.0, 75.0, 79.0]);
    let (ctx, _) = run_context(params, AdaptationConfig::default(), &bars);

    let buys: Vec<_> = ctx.transactions().iter().filter(|t| t.side == Side::Buy).collect();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0].price, 85.0);

    assert_eq!(ctx.blocked_buys().len(), 1);
    assert!(matches!(
        ctx.blocked_buys()[0].reason,
        BlockReason::MomentumPnl { unrealized_pnl } if unrealized_pnl < 0.0
    ));
}

#[test]
fn test_momentum_lifts_lot_cap() {
    let closes = linear_closes(100.0, 200.0, 120);
    let base = StrategyParams {
        max_lots: 2,
        grid_interval_percent: 0.02,
        trailing_buy_rebound_percent: 0.01,
        ..market_params()
    };
    let capped = StrategyParams {
        momentum: MomentumConfig {
            buy: true,
            sell: false,
        },
        ..base.clone()
    };
    let capital = 1_000_000.0;
    let run = |params: StrategyParams| {
        let mut ctx =
            SimulationContext::new("TEST", params, AdaptationConfig::default(), capital).unwrap();
        let mut pool = FixedCapitalPool::new(capital);
        for bar in bars_from_closes(&closes) {
            advance_day(&mut ctx, bar, &mut pool).unwrap();
        }
        ctx.transactions()
            .iter()
            .filter(|t| t.side == Side::Buy)
            .count()
    };
    // a steady rise never pulls back 10%: no buys without momentum
    assert_eq!(run(base), 0);
    assert!(run(capped) > 2);
}

// =============================================================================
// Stop-Loss Hierarchy
// =============================================================================

#[test]
fn test_individual_stop_loss_liquidates_losing_lot() {
    let params = StrategyParams {
        stop_loss: StopLossConfig {
            individual_percent: Some(0.15),
            ..Default::default()
        },
        ..market_params()
    };
    let mut closes = vec![100.0, 89.0, 95.0];
    closes.extend(linear_closes(94.0, 70.0, 10));
    let bars = bars_with_range(&closes, 0.0);
    let (ctx, _) = run_context(params, AdaptationConfig::default(), &bars);

    let stop = ctx
        .transactions()
        .iter()
        .find(|t| t.trigger == TradeTrigger::StopLoss(StopLossLevel::Individual))
        .expect("stop-loss should fire");
    assert_eq!(stop.lots[0].purchase_price, 95.0);
    assert!(stop.realized_pnl < 0.0);
    assert!(stop.price <= 95.0 * 0.85 + 1e-9);
}

#[test]
fn test_cascade_covers_short_book() {
    let params = StrategyParams {
        direction: Direction::Short,
        stop_loss: StopLossConfig {
            cascade_percent: Some(0.05),
            ..Default::default()
        },
        ..Default::default()
    };
    let bars = bars_from_closes(&[100.0, 105.0, 111.0, 115.0, 109.0, 112.0, 120.0]);
    let (ctx, pool) = run_context(params, AdaptationConfig::default(), &bars);

    let txs = ctx.transactions();
    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0].side, Side::Buy);
    assert_eq!(txs[0].price, 109.0);
    assert_eq!(txs[1].trigger, TradeTrigger::StopLoss(StopLossLevel::Cascade));
    assert_eq!(txs[1].price, 120.0);
    assert!(txs[1].realized_pnl < 0.0);
    assert!(ctx.ledger().is_empty());
    assert!(ctx.buy_order().is_none());
    assert_abs_diff_eq!(pool.deployed(), 0.0, epsilon = 1e-9);
}

// =============================================================================
// Adaptive Controller
// =============================================================================

#[test]
fn test_regime_change_iff_new_kind_with_confidence() {
    let bars = bars_from_closes(&generate_regime_closes());
    let adaptation = AdaptationConfig {
        enabled: true,
        ..Default::default()
    };
    let (ctx, _) = run_context(market_params(), adaptation.clone(), &bars);
    let events = ctx.adaptation_events();
    assert!(!events.is_empty());
    assert!(events.iter().any(|e| e.regime_change));

    let mut active: Option<ScenarioKind> = None;
    for event in events {
        let expected = Some(event.scenario.kind) != active
            && event.scenario.confidence >= adaptation.confidence_threshold;
        assert_eq!(event.regime_change, expected, "day {}", event.day_index);
        if !event.regime_change {
            assert!(event.parameter_changes.is_empty());
        }
        if event.regime_change {
            active = Some(event.scenario.kind);
        }
    }

    let strict = AdaptationConfig {
        confidence_threshold: 0.9,
        ..adaptation
    };
    let (ctx, _) = run_context(market_params(), strict, &bars);
    assert!(!ctx.adaptation_events().is_empty());
    assert!(ctx.adaptation_events().iter().all(|e| !e.regime_change));
    assert_eq!(ctx.params(), &market_params());
}

#[test]
fn test_checks_follow_schedule() {
    let bars = bars_from_closes(&generate_regime_closes());
    let adaptation = AdaptationConfig {
        enabled: true,
        check_interval_days: 7,
        rolling_window_days: 20,
        min_data_days: 25,
        ..Default::default()
    };
    let (ctx, _) = run_context(market_params(), adaptation, &bars);
    let days: Vec<usize> = ctx.adaptation_events().iter().map(|e| e.day_index).collect();
    assert_eq!(days[0], 24);
    assert!(days.windows(2).all(|w| w[1] - w[0] == 7));
}

#[test]
fn test_whipsaw_flags_fourth_change() {
    let mut closes = Vec::new();
    for segment in 0..4 {
        if segment % 2 == 0 {
            closes.extend(linear_closes(100.0, 75.0, 10));
        } else {
            closes.extend(linear_closes(75.0, 100.0, 10));
        }
    }
    let history = bars_from_closes(&closes);
    let mut controller = AdaptiveController::new(AdaptationConfig {
        enabled: true,
        check_interval_days: 10,
        rolling_window_days: 10,
        min_data_days: 10,
        ..Default::default()
    });
    let mut params = StrategyParams::default();

    let events: Vec<_> = [9, 19, 29, 39]
        .into_iter()
        .map(|day| {
            assert!(controller.is_due(day));
            controller.check(day, &history, &[], &mut params).unwrap()
        })
        .collect();

    let kinds: Vec<ScenarioKind> = events.iter().map(|e| e.scenario.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ScenarioKind::Downtrend,
            ScenarioKind::FastRally,
            ScenarioKind::Downtrend,
            ScenarioKind::FastRally
        ]
    );
    assert!(events.iter().all(|e| e.regime_change));
    assert!(!events[2].whipsaw_warning);
    assert!(events[3].whipsaw_warning);
}

#[test]
fn test_insufficient_history_skips_check() {
    let history = bars_from_closes(&[100.0; 5]);
    let mut controller = AdaptiveController::new(AdaptationConfig {
        enabled: true,
        ..Default::default()
    });
    let mut params = StrategyParams::default();
    let err = controller.check(29, &history, &[], &mut params).unwrap_err();
    assert!(err.is_recoverable());
    assert!(matches!(err, EngineError::InsufficientData { .. }));
}

// =============================================================================
// Backtest Driver
// =============================================================================

#[test]
fn test_summary_matches_logs() {
    let bars = bars_from_closes(&generate_oscillating_closes(250, 80.0, 0.15, 25.0, 0.0005));
    let mut config = Config::default();
    config.strategy = market_params();
    let result = Backtester::new(config.clone()).run(&bars).unwrap();
    let s = &result.summary;

    assert_eq!(s.total_buys + s.total_sells, result.transactions.len());
    assert_eq!(s.open_lots, result.lots.len());
    assert_relative_eq!(s.initial_capital, config.initial_capital());
    assert!(s.win_rate >= 0.0 && s.win_rate <= 100.0);
    assert!(s.max_drawdown >= 0.0);

    let again = summarize(
        s.initial_capital,
        &result.transactions,
        &result.adaptation_events,
        &result.equity_curve,
        &result.lots,
        &result.blocked_buys,
    );
    assert_eq!(&again, s);
}

#[test]
fn test_compare_adaptation() {
    let bars = bars_from_closes(&generate_regime_closes());
    let mut config = Config::default();
    config.strategy = market_params();

    let comparison = compare_adaptation(&config, &bars).unwrap();
    assert!(comparison.with_adaptation.regime_changes >= 1);
    assert_eq!(comparison.without_adaptation.regime_changes, 0);
    assert_relative_eq!(
        comparison.delta.total_return,
        comparison.with_adaptation.total_return - comparison.without_adaptation.total_return
    );
}

#[test]
fn test_batch_matches_single_runs() {
    let inputs = vec![
        (
            "OSC".to_string(),
            bars_from_closes(&generate_oscillating_closes(150, 100.0, 0.12, 18.0, 0.0)),
        ),
        ("REG".to_string(), bars_from_closes(&generate_regime_closes())),
    ];
    let config = Config::default();
    let results = run_batch(&config, &inputs);
    assert_eq!(results.len(), 2);

    for ((symbol, result), (_, bars)) in results.iter().zip(&inputs) {
        let batch = result.as_ref().unwrap();
        let mut single_config = config.clone();
        single_config.symbol = symbol.clone();
        let single = Backtester::new(single_config).run(bars).unwrap();
        assert_eq!(batch.symbol, *symbol);
        assert_eq!(batch.transactions, single.transactions);
    }
}

#[test]
fn test_invalid_bar_aborts_with_snapshot() {
    let mut bars = bars_from_closes(&[100.0, 101.0, 102.0]);
    bars[2].date = bars[0].date;
    let err = Backtester::new(Config::default()).run(&bars);
    // the date-range filter is a no-op, ordering is checked by the step
    match err {
        Err(EngineError::OutOfOrderBar {
            day_index, snapshot, ..
        }) => {
            assert_eq!(day_index, 2);
            assert_eq!(snapshot.day_index, 2);
        }
        other => panic!("expected out-of-order error, got {:?}", other.map(|r| r.symbol)),
    }
}

#[test]
fn test_export_writes_all_logs() {
    let bars = bars_from_closes(&generate_regime_closes());
    let mut config = Config::default();
    config.symbol = "EXPORT".to_string();
    config.adaptation.enabled = true;
    let result = Backtester::new(config).run(&bars).unwrap();

    let dir = std::env::temp_dir().join(format!("dca_grid_it_{}", std::process::id()));
    let paths = export::export_result(&dir, &result).unwrap();
    assert_eq!(paths.len(), 4);
    for path in &paths {
        assert!(path.exists(), "{} missing", path.display());
    }

    let json = std::fs::read_to_string(dir.join("EXPORT_adaptation.json")).unwrap();
    let events: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(
        events.as_array().map(|a| a.len()),
        Some(result.adaptation_events.len())
    );
}

#[test]
fn test_shipped_configs_load() {
    for path in ["configs/default.json", "configs/adaptive_momentum.json"] {
        let config = Config::from_file(path).unwrap();
        assert!(config.initial_capital() > 0.0, "{}", path);
    }
    let momentum = Config::from_file("configs/adaptive_momentum.json").unwrap();
    assert!(momentum.strategy.momentum.buy);
    assert!(momentum.adaptation.enabled);
}
