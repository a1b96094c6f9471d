//! Backtest command implementation

use anyhow::{Context, Result};
use dca_grid_engine::backtest::{BacktestResult, Backtester};
use dca_grid_engine::{data, export, Config};
use tracing::info;

pub struct BacktestArgs {
    pub config_path: String,
    pub symbol: Option<String>,
    pub capital: Option<f64>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub adaptation: Option<bool>,
    pub momentum_buy: bool,
    pub momentum_sell: bool,
    pub export: bool,
}

pub fn run(args: BacktestArgs) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&args.config_path)?;
    info!("Loaded configuration from: {}", args.config_path);

    if let Some(capital) = args.capital {
        info!("Overriding initial capital to: {:.2}", capital);
        config.backtest.initial_capital = Some(capital);
    }
    if let Some(enabled) = args.adaptation {
        info!("Overriding adaptation to: {}", enabled);
        config.adaptation.enabled = enabled;
    }
    if args.momentum_buy {
        config.strategy.momentum.buy = true;
    }
    if args.momentum_sell {
        config.strategy.momentum.sell = true;
    }
    super::apply_overrides(&mut config, args.symbol, args.start, args.end)?;

    let bars = data::load_symbol(&config.backtest.data_dir, &config.symbol)?;
    let result = Backtester::new(config.clone())
        .run(&bars)
        .with_context(|| format!("Backtest failed for {}", config.symbol))?;

    print_result(&result);

    if args.export {
        let paths = export::export_result(&config.backtest.results_dir, &result)?;
        for path in paths {
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

pub fn print_result(result: &BacktestResult) {
    let s = &result.summary;
    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS: {}", result.symbol);
    println!("{}", "=".repeat(60));
    println!("Initial Capital:    {:.2}", s.initial_capital);
    println!("Final Value:        {:.2}", s.final_value);
    println!("Total Return:       {:.2}%", s.total_return);
    println!("Max Drawdown:       {:.2}%", s.max_drawdown);
    println!("Win Rate:           {:.2}%", s.win_rate);
    println!("Buys / Sells:       {} / {}", s.total_buys, s.total_sells);
    println!("Avg Buy / Sell:     {:.2} / {:.2}", s.avg_buy_price, s.avg_sell_price);
    println!("Realized P&L:       {:.2}", s.realized_pnl);
    println!("Unrealized P&L:     {:.2}", s.unrealized_pnl);
    println!("Open Lots:          {} ({:.4} shares)", s.open_lots, s.final_shares);
    println!("Peak Deployed:      {:.2}", s.peak_capital_deployed);
    println!("Blocked Buys:       {}", s.blocked_buys);
    println!("Regime Changes:     {}", s.regime_changes);
    println!("Avg Regime Length:  {:.1} days", s.average_regime_duration);
    println!("Whipsaw Warnings:   {}", s.whipsaw_warnings);
    println!("{}", "=".repeat(60));
}
