//! Result export
//!
//! Writes `{symbol}_transactions.csv`, `{symbol}_equity.csv`,
//! `{symbol}_adaptation.json` and `{symbol}_summary.json` into the results
//! directory.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backtest::{AdaptationComparison, BacktestResult};
use crate::{EquityPoint, Side, Transaction};

/// One CSV row per transaction; lot ids are `;`-separated
#[derive(Debug, Serialize)]
struct TransactionRow {
    date: NaiveDate,
    day_index: usize,
    side: &'static str,
    trigger: String,
    price: f64,
    shares: f64,
    value: f64,
    realized_pnl: f64,
    lot_ids: String,
}

impl From<&Transaction> for TransactionRow {
    fn from(tx: &Transaction) -> Self {
        TransactionRow {
            date: tx.date,
            day_index: tx.day_index,
            side: match tx.side {
                Side::Buy => "buy",
                Side::Sell => "sell",
            },
            trigger: tx.trigger.to_string(),
            price: tx.price,
            shares: tx.shares,
            value: tx.value(),
            realized_pnl: tx.realized_pnl,
            lot_ids: tx
                .lots
                .iter()
                .map(|l| l.lot_id.to_string())
                .collect::<Vec<_>>()
                .join(";"),
        }
    }
}

pub fn write_transactions_csv(path: impl AsRef<Path>, transactions: &[Transaction]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for tx in transactions {
        writer
            .serialize(TransactionRow::from(tx))
            .context("Failed to write transaction row")?;
    }
    writer.flush().context("Failed to flush transactions CSV")?;
    Ok(())
}

pub fn write_equity_csv(path: impl AsRef<Path>, equity_curve: &[EquityPoint]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for point in equity_curve {
        writer.serialize(point).context("Failed to write equity row")?;
    }
    writer.flush().context("Failed to flush equity CSV")?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Export every log of a run; returns the written paths
pub fn export_result(results_dir: impl AsRef<Path>, result: &BacktestResult) -> Result<Vec<PathBuf>> {
    let dir = results_dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let symbol = &result.symbol;
    let transactions = dir.join(format!("{}_transactions.csv", symbol));
    let equity = dir.join(format!("{}_equity.csv", symbol));
    let adaptation = dir.join(format!("{}_adaptation.json", symbol));
    let summary = dir.join(format!("{}_summary.json", symbol));

    write_transactions_csv(&transactions, &result.transactions)?;
    write_equity_csv(&equity, &result.equity_curve)?;
    write_json(&adaptation, &result.adaptation_events)?;
    write_json(&summary, &result.summary)?;

    info!(symbol = %symbol, dir = %dir.display(), "Exported results");
    Ok(vec![transactions, equity, adaptation, summary])
}

/// Export an adaptation on/off comparison as `{symbol}_comparison.json`
pub fn export_comparison(
    results_dir: impl AsRef<Path>,
    comparison: &AdaptationComparison,
) -> Result<PathBuf> {
    let dir = results_dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!("{}_comparison.json", comparison.symbol));
    write_json(&path, comparison)?;
    Ok(path)
}
