//! Batch command: independent engines for several symbols

use anyhow::Result;
use dca_grid_engine::backtest::{run_batch, run_batch_with_progress, Backtester};
use dca_grid_engine::{data, export, Config};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

pub fn run(config_path: String, symbols: String, sequential: bool, export_results: bool) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let symbols: Vec<String> = symbols
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let inputs = data::load_symbols(&config.backtest.data_dir, &symbols)?;
    println!("Running {} symbols", inputs.len());

    let results = if sequential {
        inputs
            .iter()
            .map(|(symbol, bars)| {
                let mut cfg = config.clone();
                cfg.symbol = symbol.clone();
                (symbol.clone(), Backtester::new(cfg).run(bars))
            })
            .collect::<Vec<_>>()
    } else if inputs.len() > 1 {
        let pb = ProgressBar::new(inputs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("#>-"),
        );
        let results = run_batch_with_progress(&config, &inputs, pb.clone());
        pb.finish_with_message("done");
        results
    } else {
        run_batch(&config, &inputs)
    };

    println!("\n{:<10} {:>10} {:>10} {:>10} {:>6} {:>6}", "Symbol", "Return", "MaxDD", "WinRate", "Buys", "Sells");
    for (symbol, result) in &results {
        match result {
            Ok(r) => {
                let s = &r.summary;
                println!(
                    "{:<10} {:>9.2}% {:>9.2}% {:>9.2}% {:>6} {:>6}",
                    symbol, s.total_return, s.max_drawdown, s.win_rate, s.total_buys, s.total_sells
                );
                if export_results {
                    export::export_result(&config.backtest.results_dir, r)?;
                }
            }
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Backtest failed");
                println!("{:<10} FAILED: {}", symbol, e);
            }
        }
    }

    Ok(())
}
