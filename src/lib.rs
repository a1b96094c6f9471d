//! DCA Grid Engine
//!
//! Single-security simulation of a dollar-cost-averaging grid strategy:
//! lot bookkeeping, trailing-stop entries and exits, grid and profit
//! policies, a stop-loss hierarchy, a momentum overlay and an adaptive
//! controller that rescales parameters on market regime changes.

pub mod adaptive;
pub mod backtest;
pub mod capital;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod export;
pub mod extremum;
pub mod grid;
pub mod indicators;
pub mod ledger;
pub mod momentum;
pub mod profit;
pub mod risk;
pub mod trailing;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, EngineError, LedgerError};
pub use types::*;
