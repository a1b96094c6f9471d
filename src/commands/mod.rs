//! CLI subcommands

pub mod backtest;
pub mod batch;
pub mod compare;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use dca_grid_engine::Config;
use tracing::info;

/// Parse a `YYYY-MM-DD` override
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("Invalid date: {}", raw))
}

/// Apply symbol and date-range overrides shared by every subcommand
pub fn apply_overrides(
    config: &mut Config,
    symbol: Option<String>,
    start: Option<String>,
    end: Option<String>,
) -> Result<()> {
    if let Some(symbol) = symbol {
        info!("Overriding symbol to: {}", symbol);
        config.symbol = symbol;
    }
    if let Some(start) = start {
        info!("Overriding start date to: {}", start);
        config.backtest.start_date = Some(parse_date(&start)?);
    }
    if let Some(end) = end {
        info!("Overriding end date to: {}", end);
        config.backtest.end_date = Some(parse_date(&end)?);
    }
    config.validate().context("Invalid configuration after overrides")?;
    Ok(())
}
