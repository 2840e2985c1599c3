//! Portfolio risk engine - main entry point
//!
//! This binary provides two subcommands:
//! - report: Run a full risk cycle over a position fixture and print the report
//! - optimize: Run cost-aware portfolio optimization against a signal file

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "risk-engine")]
#[command(about = "Portfolio risk engine with VaR, stress testing, and cost-aware optimization", long_about = None)]
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
    /// Compute risk metrics and stress results for a portfolio fixture
    Report {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Path to the portfolio fixture (positions + market data)
        #[arg(short, long, default_value = "data/portfolio.json")]
        data: String,

        /// VaR method override (parametric, historical, monte_carlo)
        #[arg(long)]
        var_method: Option<String>,

        /// Also run the stress scenario catalog
        #[arg(long)]
        stress: bool,
    },

    /// Optimize portfolio weights against an expected-return signal file
    Optimize {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Path to the portfolio fixture (positions + market data)
        #[arg(short, long, default_value = "data/portfolio.json")]
        data: String,

        /// Path to a JSON map of symbol -> annual expected return
        #[arg(short, long)]
        returns: String,

        /// Risk aversion coefficient (higher = more conservative)
        #[arg(long, default_value = "2.0")]
        risk_aversion: f64,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // File layer - same format but without ANSI colors
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

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Report { .. } => "report",
        Commands::Optimize { .. } => "optimize",
    };

    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Report {
            config,
            data,
            var_method,
            stress,
        } => commands::report::run(config, data, var_method, stress),

        Commands::Optimize {
            config,
            data,
            returns,
            risk_aversion,
        } => commands::optimize::run(config, data, returns, risk_aversion),
    }
}
