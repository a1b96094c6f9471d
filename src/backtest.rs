//! Backtest driver
//!
//! Replays a price series through the daily step function and derives the
//! run summary from the logs. One engine per security; several securities
//! or the adaptation on/off comparison run in parallel with rayon.

use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::adaptive::AdaptationEvent;
use crate::capital::FixedCapitalPool;
use crate::config::{Config, StrategyParams};
use crate::data;
use crate::engine::{advance_day, SimulationContext};
use crate::error::EngineError;
use crate::indicators;
use crate::{BlockedBuy, EquityPoint, Lot, PriceBar, Side, SummaryStatistics, Transaction};

/// Backtest engine
pub struct Backtester {
    config: Config,
}

impl Backtester {
    pub fn new(config: Config) -> Self {
        Backtester { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the configured symbol over `bars`, restricted to the configured
    /// date range
    pub fn run(&self, bars: &[PriceBar]) -> Result<BacktestResult, EngineError> {
        let config = &self.config;
        let bars = data::filter_date_range(
            bars.to_vec(),
            config.backtest.start_date,
            config.backtest.end_date,
        );

        let initial_capital = config.initial_capital();
        let mut ctx = SimulationContext::from_config(config)?;
        let mut pool = FixedCapitalPool::new(initial_capital);

        for bar in bars {
            if let Err(e) = advance_day(&mut ctx, bar, &mut pool) {
                error!(symbol = %config.symbol, error = %e, "Simulation aborted");
                return Err(e);
            }
        }

        let summary = summarize(
            initial_capital,
            ctx.transactions(),
            ctx.adaptation_events(),
            ctx.equity_curve(),
            ctx.ledger().lots(),
            ctx.blocked_buys(),
        );
        info!(
            symbol = %config.symbol,
            days = ctx.days_processed(),
            buys = summary.total_buys,
            sells = summary.total_sells,
            total_return = format!("{:.2}%", summary.total_return),
            "Backtest complete"
        );

        Ok(BacktestResult {
            symbol: config.symbol.clone(),
            final_params: ctx.params().clone(),
            lots: ctx.ledger().lots().to_vec(),
            transactions: ctx.transactions().to_vec(),
            adaptation_events: ctx.adaptation_events().to_vec(),
            blocked_buys: ctx.blocked_buys().to_vec(),
            equity_curve: ctx.equity_curve().to_vec(),
            summary,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub symbol: String,
    /// Active parameters at the end of the run
    pub final_params: StrategyParams,
    /// Final ledger
    pub lots: Vec<Lot>,
    pub transactions: Vec<Transaction>,
    pub adaptation_events: Vec<AdaptationEvent>,
    pub blocked_buys: Vec<BlockedBuy>,
    pub equity_curve: Vec<EquityPoint>,
    pub summary: SummaryStatistics,
}

/// Derive the run summary from the logs alone
pub fn summarize(
    initial_capital: f64,
    transactions: &[Transaction],
    adaptation_events: &[AdaptationEvent],
    equity_curve: &[EquityPoint],
    lots: &[Lot],
    blocked_buys: &[BlockedBuy],
) -> SummaryStatistics {
    let buys: Vec<&Transaction> = transactions.iter().filter(|t| t.side == Side::Buy).collect();
    let sells: Vec<&Transaction> = transactions.iter().filter(|t| t.side == Side::Sell).collect();

    let average_price = |txs: &[&Transaction]| {
        let shares: f64 = txs.iter().map(|t| t.shares).sum();
        if shares > 0.0 {
            txs.iter().map(|t| t.value()).sum::<f64>() / shares
        } else {
            0.0
        }
    };

    let win_rate = if sells.is_empty() {
        0.0
    } else {
        sells.iter().filter(|t| t.realized_pnl > 0.0).count() as f64 / sells.len() as f64 * 100.0
    };

    let mut values = Vec::with_capacity(equity_curve.len() + 1);
    values.push(initial_capital);
    values.extend(equity_curve.iter().map(|p| p.value));
    let final_value = equity_curve.last().map_or(initial_capital, |p| p.value);

    let last = equity_curve.last();
    SummaryStatistics {
        initial_capital,
        final_value,
        total_return: indicators::total_return(&[initial_capital, final_value]) * 100.0,
        win_rate,
        max_drawdown: indicators::max_drawdown(&values) * 100.0,
        regime_changes: adaptation_events.iter().filter(|e| e.regime_change).count(),
        average_regime_duration: average_regime_duration(adaptation_events, equity_curve.len()),
        whipsaw_warnings: adaptation_events.iter().filter(|e| e.whipsaw_warning).count(),
        total_buys: buys.len(),
        total_sells: sells.len(),
        avg_buy_price: average_price(&buys),
        avg_sell_price: average_price(&sells),
        realized_pnl: last.map_or(0.0, |p| p.realized_pnl),
        unrealized_pnl: last.map_or(0.0, |p| p.unrealized_pnl),
        final_shares: last.map_or(0.0, |p| p.total_shares),
        open_lots: lots.len(),
        peak_capital_deployed: equity_curve.iter().map(|p| p.cost_basis).fold(0.0, f64::max),
        blocked_buys: blocked_buys.len(),
    }
}

/// Mean days each adopted regime stayed active; the last runs to the end
fn average_regime_duration(events: &[AdaptationEvent], total_days: usize) -> f64 {
    let starts: Vec<usize> = events
        .iter()
        .filter(|e| e.regime_change)
        .map(|e| e.day_index)
        .collect();
    if starts.is_empty() {
        return 0.0;
    }

    let ends = starts.iter().skip(1).copied().chain(std::iter::once(total_days));
    let total: usize = starts
        .iter()
        .zip(ends)
        .map(|(start, end)| end.saturating_sub(*start))
        .sum();
    total as f64 / starts.len() as f64
}

/// Summary differences, adaptive minus static
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryDelta {
    pub total_return: f64,
    pub win_rate: f64,
    pub max_drawdown: f64,
    pub final_value: f64,
    pub realized_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationComparison {
    pub symbol: String,
    pub with_adaptation: SummaryStatistics,
    pub without_adaptation: SummaryStatistics,
    pub delta: SummaryDelta,
}

/// Run the same inputs with adaptation enabled and disabled
pub fn compare_adaptation(
    config: &Config,
    bars: &[PriceBar],
) -> Result<AdaptationComparison, EngineError> {
    let mut adaptive = config.clone();
    adaptive.adaptation.enabled = true;
    let mut fixed = config.clone();
    fixed.adaptation.enabled = false;

    let (with, without) = rayon::join(
        || Backtester::new(adaptive).run(bars),
        || Backtester::new(fixed).run(bars),
    );
    let with = with?.summary;
    let without = without?.summary;

    let delta = SummaryDelta {
        total_return: with.total_return - without.total_return,
        win_rate: with.win_rate - without.win_rate,
        max_drawdown: with.max_drawdown - without.max_drawdown,
        final_value: with.final_value - without.final_value,
        realized_pnl: with.realized_pnl - without.realized_pnl,
    };

    Ok(AdaptationComparison {
        symbol: config.symbol.clone(),
        with_adaptation: with,
        without_adaptation: without,
        delta,
    })
}

fn run_symbol(
    config: &Config,
    symbol: &str,
    bars: &[PriceBar],
) -> (String, Result<BacktestResult, EngineError>) {
    let mut cfg = config.clone();
    cfg.symbol = symbol.to_string();
    (symbol.to_string(), Backtester::new(cfg).run(bars))
}

/// Run independent engines for several symbols in parallel
pub fn run_batch(
    config: &Config,
    inputs: &[(String, Vec<PriceBar>)],
) -> Vec<(String, Result<BacktestResult, EngineError>)> {
    info!("Running {} symbols", inputs.len());
    inputs
        .par_iter()
        .map(|(symbol, bars)| run_symbol(config, symbol, bars))
        .collect()
}

/// Run a batch with progress tracking
pub fn run_batch_with_progress(
    config: &Config,
    inputs: &[(String, Vec<PriceBar>)],
    progress_bar: ProgressBar,
) -> Vec<(String, Result<BacktestResult, EngineError>)> {
    info!("Running {} symbols with progress tracking", inputs.len());
    inputs
        .par_iter()
        .map(|(symbol, bars)| {
            let result = run_symbol(config, symbol, bars);
            progress_bar.inc(1);
            result
        })
        .collect()
}
