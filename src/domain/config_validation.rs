//! Configuration reading and validation.
//!
//! Every key is optional and falls back to a default, but a
//! present value that does not parse or is out of range is a `ConfigInvalid`.

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::TraderError;
use crate::domain::increment::IncrementSet;
use crate::domain::model::ActivationCriteria;
use crate::domain::risk::RiskConfig;
use crate::domain::structure::MIN_WINDOW;
use crate::domain::trier::TrierConfig;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_INCREMENT_START: f64 = 1.002;
pub const DEFAULT_INCREMENT_STOP: f64 = 1.06;
pub const DEFAULT_INCREMENT_STEP: f64 = 0.002;
pub const DEFAULT_WINDOW_SIZE: i64 = 30;
pub const DEFAULT_OUTCOME_HORIZON: i64 = 60;

/// Read a float, rejecting values that are present but not numeric.
pub fn read_double(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, TraderError> {
    match config.get_string(section, key) {
        Some(raw) if raw.trim().parse::<f64>().is_err() => Err(TraderError::invalid(
            section,
            key,
            format!("'{raw}' is not a number"),
        )),
        _ => Ok(config.get_double(section, key, default)),
    }
}

/// Read an integer, rejecting values that are present but not integral.
pub fn read_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<i64, TraderError> {
    match config.get_string(section, key) {
        Some(raw) if raw.trim().parse::<i64>().is_err() => Err(TraderError::invalid(
            section,
            key,
            format!("'{raw}' is not an integer"),
        )),
        _ => Ok(config.get_int(section, key, default)),
    }
}

/// Generate the increment vocabulary from `[increments]`.
pub fn increment_settings(config: &dyn ConfigPort) -> Result<IncrementSet, TraderError> {
    let start = read_double(config, "increments", "start", DEFAULT_INCREMENT_START)?;
    let stop = read_double(config, "increments", "stop", DEFAULT_INCREMENT_STOP)?;
    let step = read_double(config, "increments", "step", DEFAULT_INCREMENT_STEP)?;
    IncrementSet::generate(start, stop, step)
}

pub fn backtest_settings(config: &dyn ConfigPort) -> Result<BacktestConfig, TraderError> {
    let window_size = validate_at_least(
        config,
        "backtest",
        "window_size",
        DEFAULT_WINDOW_SIZE,
        MIN_WINDOW as i64,
    )?;
    let outcome_horizon =
        validate_at_least(config, "backtest", "outcome_horizon", DEFAULT_OUTCOME_HORIZON, 1)?;
    let profit_threshold = validate_profit_threshold(config)?;
    let min_occurrences = validate_at_least(config, "backtest", "min_occurrences", 2000, 1)?;
    let activation_threshold =
        validate_unit_interval(config, "backtest", "activation_threshold", 0.70)?;
    let workers = validate_at_least(config, "backtest", "workers", 0, 0)?;

    Ok(BacktestConfig {
        trier: TrierConfig {
            window_size: window_size as usize,
            outcome_horizon: outcome_horizon as usize,
            profit_threshold,
            workers: workers as usize,
        },
        criteria: ActivationCriteria {
            min_occurrences: min_occurrences as u64,
            activation_threshold,
        },
    })
}

pub fn risk_settings(config: &dyn ConfigPort) -> Result<RiskConfig, TraderError> {
    let defaults = RiskConfig::default();
    Ok(RiskConfig {
        size_fraction: validate_size_fraction(config, defaults.size_fraction)?,
        max_adverse_move: validate_max_adverse_move(config, defaults.max_adverse_move)?,
        slippage_threshold: validate_unit_interval(
            config,
            "live",
            "slippage_threshold",
            defaults.slippage_threshold,
        )?,
        deactivation_threshold: validate_unit_interval(
            config,
            "live",
            "deactivation_threshold",
            defaults.deactivation_threshold,
        )?,
        min_live_trades: validate_at_least(
            config,
            "live",
            "min_live_trades",
            defaults.min_live_trades as i64,
            1,
        )? as u32,
        min_order_quantity: validate_non_negative(
            config,
            "live",
            "min_order_quantity",
            defaults.min_order_quantity,
        )?,
        max_hold_ticks: validate_at_least(
            config,
            "live",
            "max_hold_ticks",
            defaults.max_hold_ticks as i64,
            0,
        )? as u64,
    })
}

fn validate_profit_threshold(config: &dyn ConfigPort) -> Result<f64, TraderError> {
    let value = read_double(config, "backtest", "profit_threshold", DEFAULT_INCREMENT_START)?;
    if !value.is_finite() || value <= 0.0 {
        return Err(TraderError::invalid(
            "backtest",
            "profit_threshold",
            "profit_threshold must be a positive multiplier",
        ));
    }
    Ok(value)
}

fn validate_size_fraction(config: &dyn ConfigPort, default: f64) -> Result<f64, TraderError> {
    let value = read_double(config, "live", "size_fraction", default)?;
    if !(value > 0.0 && value <= 1.0) {
        return Err(TraderError::invalid(
            "live",
            "size_fraction",
            "size_fraction must be in (0, 1]",
        ));
    }
    Ok(value)
}

fn validate_max_adverse_move(config: &dyn ConfigPort, default: f64) -> Result<f64, TraderError> {
    let value = read_double(config, "live", "max_adverse_move", default)?;
    if !(value > 0.0 && value < 1.0) {
        return Err(TraderError::invalid(
            "live",
            "max_adverse_move",
            "max_adverse_move must be in (0, 1)",
        ));
    }
    Ok(value)
}

fn validate_unit_interval(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, TraderError> {
    let value = read_double(config, section, key, default)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(TraderError::invalid(
            section,
            key,
            format!("{key} must be between 0 and 1"),
        ));
    }
    Ok(value)
}

pub(crate) fn validate_non_negative(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, TraderError> {
    let value = read_double(config, section, key, default)?;
    if !value.is_finite() || value < 0.0 {
        return Err(TraderError::invalid(
            section,
            key,
            format!("{key} must be non-negative"),
        ));
    }
    Ok(value)
}

fn validate_at_least(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
    minimum: i64,
) -> Result<i64, TraderError> {
    let value = read_int(config, section, key, default)?;
    if value < minimum {
        return Err(TraderError::invalid(
            section,
            key,
            format!("{key} must be at least {minimum}"),
        ));
    }
    Ok(value)
}
