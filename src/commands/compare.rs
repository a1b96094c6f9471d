//! Adaptation comparison command

use anyhow::{Context, Result};
use dca_grid_engine::backtest::compare_adaptation;
use dca_grid_engine::{data, export, Config};
use tracing::info;

pub fn run(
    config_path: String,
    symbol: Option<String>,
    start: Option<String>,
    end: Option<String>,
) -> Result<()> {
    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);
    super::apply_overrides(&mut config, symbol, start, end)?;

    let bars = data::load_symbol(&config.backtest.data_dir, &config.symbol)?;
    let comparison = compare_adaptation(&config, &bars)
        .with_context(|| format!("Comparison failed for {}", config.symbol))?;

    let on = &comparison.with_adaptation;
    let off = &comparison.without_adaptation;
    let d = &comparison.delta;
    println!("\n{}", "=".repeat(60));
    println!("ADAPTATION COMPARISON: {}", comparison.symbol);
    println!("{}", "=".repeat(60));
    println!("{:<18} {:>12} {:>12} {:>12}", "", "adaptive", "static", "delta");
    println!("{:<18} {:>11.2}% {:>11.2}% {:>11.2}%", "Total Return", on.total_return, off.total_return, d.total_return);
    println!("{:<18} {:>11.2}% {:>11.2}% {:>11.2}%", "Win Rate", on.win_rate, off.win_rate, d.win_rate);
    println!("{:<18} {:>11.2}% {:>11.2}% {:>11.2}%", "Max Drawdown", on.max_drawdown, off.max_drawdown, d.max_drawdown);
    println!("{:<18} {:>12.2} {:>12.2} {:>12.2}", "Final Value", on.final_value, off.final_value, d.final_value);
    println!("{:<18} {:>12}", "Regime Changes", on.regime_changes);
    println!("{}", "=".repeat(60));

    let path = export::export_comparison(&config.backtest.results_dir, &comparison)?;
    println!("Wrote {}", path.display());
    Ok(())
}
