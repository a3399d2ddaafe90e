//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use crate::adapters::csv_adapter::CsvPriceSource;
use crate::adapters::csv_report_adapter::CsvModelReport;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::paper_exchange::{PaperConfig, PaperExchange};
use crate::domain::backtest::{run_backtest, BacktestConfig};
use crate::domain::config_validation::{
    backtest_settings, increment_settings, read_double, risk_settings, validate_non_negative,
};
use crate::domain::error::TraderError;
use crate::domain::increment::IncrementSet;
use crate::domain::model::ModelSet;
use crate::domain::position::PositionStatus;
use crate::domain::price::{PricePoint, PriceSeries};
use crate::domain::risk::RiskConfig;
use crate::domain::session::{TickOutcome, TradingSession};
use crate::ports::config_port::ConfigPort;
use crate::ports::price_port::PriceSource;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(
    name = "patterntrader",
    about = "A-B-C-D price pattern backtester and paper trader"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backtest a price history and list the activated models
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        prices: PathBuf,
        /// Write the model set to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Backtest, then replay ticks through a paper trading session
    Simulate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        prices: PathBuf,
        /// Ticks to replay; without it the tail of --prices is replayed
        #[arg(long)]
        ticks: Option<PathBuf>,
        /// Share of --prices used for the backtest when --ticks is absent
        #[arg(long, default_value_t = 0.7)]
        train_fraction: f64,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Everything a run needs, read from one configuration file.
#[derive(Debug, Clone)]
pub struct TraderConfig {
    pub increments: Arc<IncrementSet>,
    pub backtest: BacktestConfig,
    pub risk: RiskConfig,
    pub paper: PaperConfig,
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest {
            config,
            prices,
            output,
        } => run_backtest_command(&config, &prices, output.as_deref()),
        Command::Simulate {
            config,
            prices,
            ticks,
            train_fraction,
            output,
        } => run_simulate(
            &config,
            &prices,
            ticks.as_deref(),
            train_fraction,
            output.as_deref(),
        ),
        Command::Validate { config } => run_validate(&config),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run failed");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, TraderError> {
    FileConfigAdapter::from_file(path).map_err(|e| TraderError::ConfigParse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })
}

pub fn build_trader_config(config: &dyn ConfigPort) -> Result<TraderConfig, TraderError> {
    let increments = increment_settings(config)?;
    let backtest = backtest_settings(config)?;
    if increments.first_at_least(backtest.trier.profit_threshold) >= increments.len() {
        return Err(TraderError::invalid(
            "backtest",
            "profit_threshold",
            "profit_threshold is above every increment",
        ));
    }
    Ok(TraderConfig {
        increments: Arc::new(increments),
        backtest,
        risk: risk_settings(config)?,
        paper: build_paper_config(config)?,
    })
}

pub fn build_paper_config(config: &dyn ConfigPort) -> Result<PaperConfig, TraderError> {
    let defaults = PaperConfig::default();
    let initial_balance = read_double(config, "paper", "initial_balance", defaults.initial_balance)?;
    if !(initial_balance > 0.0) {
        return Err(TraderError::invalid(
            "paper",
            "initial_balance",
            "initial_balance must be positive",
        ));
    }
    let slippage_pct = validate_non_negative(config, "paper", "slippage_pct", defaults.slippage_pct)?;
    Ok(PaperConfig {
        initial_balance,
        slippage_pct,
    })
}

/// Split a history into a backtest part and a replay part.
pub fn split_series(
    series: &PriceSeries,
    train_fraction: f64,
) -> Result<(PriceSeries, Vec<PricePoint>), TraderError> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(TraderError::invalid(
            "simulate",
            "train_fraction",
            "train_fraction must be in (0, 1)",
        ));
    }
    let split = (series.len() as f64 * train_fraction) as usize;
    let (train, live) = series.points().split_at(split);
    Ok((PriceSeries::try_from_points(train.to_vec())?, live.to_vec()))
}

fn run_backtest_command(
    config_path: &Path,
    prices_path: &Path,
    output_path: Option<&Path>,
) -> Result<(), TraderError> {
    info!(path = %config_path.display(), "loading config");
    let config = build_trader_config(&load_config(config_path)?)?;
    let series = CsvPriceSource::new(prices_path).load_series()?;

    let run = run_backtest(&series, Arc::clone(&config.increments), &config.backtest)?;
    print_models(&run.models);
    println!(
        "{} structures, {} signatures, {} models",
        run.structures(),
        run.tallies.len(),
        run.models.len()
    );

    if let Some(path) = output_path {
        CsvModelReport.write_models(&run.models, path)?;
        info!(path = %path.display(), "model report written");
    }
    Ok(())
}

fn run_simulate(
    config_path: &Path,
    prices_path: &Path,
    ticks_path: Option<&Path>,
    train_fraction: f64,
    output_path: Option<&Path>,
) -> Result<(), TraderError> {
    info!(path = %config_path.display(), "loading config");
    let config = build_trader_config(&load_config(config_path)?)?;
    let history = CsvPriceSource::new(prices_path).load_series()?;

    let (train, ticks) = match ticks_path {
        Some(path) => {
            let live = CsvPriceSource::new(path).load_series()?;
            (history, live.points().to_vec())
        }
        None => split_series(&history, train_fraction)?,
    };

    let run = run_backtest(&train, Arc::clone(&config.increments), &config.backtest)?;
    print_models(&run.models);

    let mut session = TradingSession::new(
        run.models,
        Arc::clone(&config.increments),
        config.backtest.trier.window_size,
        config.risk,
        PaperExchange::new(config.paper),
    )?;

    let mut skipped = 0usize;
    let mut failed = 0usize;
    for point in ticks {
        session.exchange_mut().set_price(point.price);
        match session.on_tick(point)? {
            TickOutcome::Skipped(_) => skipped += 1,
            TickOutcome::Failed(_) => failed += 1,
            _ => {}
        }
    }
    session.shutdown()?;

    let snapshot = session.snapshot();
    let trades = session.closed_trades();
    let wins = trades.iter().filter(|t| t.is_win()).count();
    let stops = trades
        .iter()
        .filter(|t| t.status == PositionStatus::ClosedStop)
        .count();
    let pnl: f64 = trades.iter().map(|t| t.pnl).sum();

    println!(
        "{} ticks, {} trades ({} wins, {} stopped), pnl {:.2}, equity {:.2}",
        snapshot.ticks,
        trades.len(),
        wins,
        stops,
        pnl,
        session.exchange().equity()
    );
    println!(
        "{} models still enabled, {} ticks skipped, {} signals failed",
        snapshot.enabled_models.len(),
        skipped,
        failed
    );
    if let Some(reason) = &snapshot.halt_reason {
        println!("halted: {reason}");
    }

    if let Some(path) = output_path {
        CsvModelReport.write_models(session.models(), path)?;
        info!(path = %path.display(), "model report written");
    }
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<(), TraderError> {
    let config = build_trader_config(&load_config(config_path)?)?;
    let values = config.increments.values();
    println!("Configuration is valid");
    println!(
        "  increments: {} ({} to {})",
        values.len(),
        values.first().copied().unwrap_or_default(),
        values.last().copied().unwrap_or_default()
    );
    println!(
        "  window {} / horizon {} / profit threshold {}",
        config.backtest.trier.window_size,
        config.backtest.trier.outcome_horizon,
        config.backtest.trier.profit_threshold
    );
    println!(
        "  activation: {} occurrences at {:.2}",
        config.backtest.criteria.min_occurrences, config.backtest.criteria.activation_threshold
    );
    println!(
        "  live: size {:.3}, stop {:.3}, slippage {:.4}, deactivate below {:.2} after {} trades",
        config.risk.size_fraction,
        config.risk.max_adverse_move,
        config.risk.slippage_threshold,
        config.risk.deactivation_threshold,
        config.risk.min_live_trades
    );
    Ok(())
}

fn print_models(models: &ModelSet) {
    for model in models.models() {
        println!(
            "{:>5}  {}  occurrences {:>6}  win rate {:.3}",
            model.id.to_string(),
            model.signature.describe(models.increments()),
            model.occurrence_count,
            model.win_rate
        );
    }
}
