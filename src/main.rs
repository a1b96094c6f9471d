//! DCA grid engine - main entry point
//!
//! This binary provides three subcommands:
//! - backtest: Simulate one symbol and export its logs
//! - compare: Run one symbol with adaptation on and off
//! - batch: Simulate several symbols in parallel

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "dca-grid-engine")]
#[command(about = "DCA grid strategy simulator with trailing stops and adaptive regime control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single-symbol backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Symbol (overrides config file)
        #[arg(short, long)]
        symbol: Option<String>,

        /// Initial capital
        #[arg(long)]
        capital: Option<f64>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,

        /// Enable the adaptive controller
        #[arg(long, conflicts_with = "no_adaptation")]
        adaptation: bool,

        /// Disable the adaptive controller
        #[arg(long)]
        no_adaptation: bool,

        /// Momentum mode for buys
        #[arg(long)]
        momentum_buy: bool,

        /// Momentum mode for sells
        #[arg(long)]
        momentum_sell: bool,

        /// Skip writing result files
        #[arg(long)]
        no_export: bool,
    },

    /// Compare adaptation on and off for one symbol
    Compare {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Symbol (overrides config file)
        #[arg(short, long)]
        symbol: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
    },

    /// Run several symbols in parallel
    Batch {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Symbols to run (comma-separated). E.g., "AAPL,MSFT,NVDA"
        #[arg(long)]
        symbols: String,

        /// Run sequentially instead of parallel
        #[arg(long)]
        sequential: bool,

        /// Skip writing result files
        #[arg(long)]
        no_export: bool,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{timestamp}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Console stays clean for the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Compare { .. } => ("compare", false),
        Commands::Batch { .. } => ("batch", true),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Backtest {
            config,
            symbol,
            capital,
            start,
            end,
            adaptation,
            no_adaptation,
            momentum_buy,
            momentum_sell,
            no_export,
        } => {
            let adaptation = match (adaptation, no_adaptation) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            commands::backtest::run(commands::backtest::BacktestArgs {
                config_path: config,
                symbol,
                capital,
                start,
                end,
                adaptation,
                momentum_buy,
                momentum_sell,
                export: !no_export,
            })
        }

        Commands::Compare {
            config,
            symbol,
            start,
            end,
        } => commands::compare::run(config, symbol, start, end),

        Commands::Batch {
            config,
            symbols,
            sequential,
            no_export,
        } => commands::batch::run(config, symbols, sequential, !no_export),
    }
}
