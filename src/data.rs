//! Price history loading
//!
//! Reads daily bars from CSV files. Accepted headers are
//! `date,open,high,low,close[,volume]` or just `date,close`; a `datetime` or
//! `timestamp` column may stand in for `date`.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::path::Path;
use tracing::{info, warn};

use crate::PriceBar;

fn column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    // Datetime values keep only their date part
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .with_context(|| format!("Failed to parse date: {}", raw))
}

fn parse_field(record: &csv::StringRecord, index: usize, name: &str, row: usize) -> Result<f64> {
    record
        .get(index)
        .with_context(|| format!("Missing {} column in row {}", name, row))?
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {} in row {}", name, row))
}

/// Load daily bars from a CSV file, sorted by date with duplicates dropped
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<PriceBar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
    let headers = reader.headers().context("Failed to read CSV headers")?.clone();

    let date_col = column(&headers, &["date", "datetime", "timestamp"])
        .context("Missing date column")?;
    let close_col = column(&headers, &["close", "adj_close", "price"]).context("Missing close column")?;
    let open_col = column(&headers, &["open"]);
    let high_col = column(&headers, &["high"]);
    let low_col = column(&headers, &["low"]);
    let volume_col = column(&headers, &["volume"]);

    let mut bars = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 1;
        let record = result.with_context(|| format!("Failed to read row {}", row))?;

        let date = parse_date(record.get(date_col).context("Missing date value")?)?;
        let close = parse_field(&record, close_col, "close", row)?;
        let optional = |col: Option<usize>, name: &str| -> Result<Option<f64>> {
            col.map(|i| parse_field(&record, i, name, row)).transpose()
        };
        let open = optional(open_col, "open")?.unwrap_or(close);
        let high = optional(high_col, "high")?.unwrap_or(open.max(close));
        let low = optional(low_col, "low")?.unwrap_or(open.min(close));
        let volume = optional(volume_col, "volume")?.unwrap_or(0.0);

        let bar = PriceBar::new(date, open, high, low, close, volume)
            .with_context(|| format!("Invalid bar in row {} ({})", row, date))?;
        bars.push(bar);
    }

    let before = bars.len();
    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    if bars.len() < before {
        warn!(
            path = %path.display(),
            dropped = before - bars.len(),
            "Dropped bars with duplicate dates"
        );
    }

    Ok(bars)
}

/// Keep bars inside the inclusive `[start, end]` range
pub fn filter_date_range(
    bars: Vec<PriceBar>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Vec<PriceBar> {
    bars.into_iter()
        .filter(|b| start.map_or(true, |s| b.date >= s))
        .filter(|b| end.map_or(true, |e| b.date <= e))
        .collect()
}

/// Load `{data_dir}/{symbol}.csv`
pub fn load_symbol(data_dir: impl AsRef<Path>, symbol: &str) -> Result<Vec<PriceBar>> {
    let path = data_dir.as_ref().join(format!("{}.csv", symbol));
    if !path.exists() {
        bail!("Data file not found: {}", path.display());
    }
    let bars = load_csv(&path).with_context(|| format!("Failed to load data for {}", symbol))?;
    info!(symbol = %symbol, bars = bars.len(), "Loaded price history");
    Ok(bars)
}

/// Load several symbols, skipping missing files
pub fn load_symbols(
    data_dir: impl AsRef<Path>,
    symbols: &[String],
) -> Result<Vec<(String, Vec<PriceBar>)>> {
    let mut data = Vec::new();
    for symbol in symbols {
        match load_symbol(data_dir.as_ref(), symbol) {
            Ok(bars) => data.push((symbol.clone(), bars)),
            Err(e) => warn!(symbol = %symbol, error = %e, "Skipping symbol"),
        }
    }

    if data.is_empty() {
        bail!("No data loaded for any symbol");
    }
    Ok(data)
}
