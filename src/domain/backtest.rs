//! Backtest pipeline: price history in, ordered model set out.

use std::sync::Arc;

use tracing::info;

use super::error::TraderError;
use super::increment::IncrementSet;
use super::model::{aggregate, ActivationCriteria, ModelSet};
use super::price::PriceSeries;
use super::trier::{run_trier, TallyMap, TrierConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub trier: TrierConfig,
    pub criteria: ActivationCriteria,
}

#[derive(Debug, Clone)]
pub struct BacktestRun {
    pub models: ModelSet,
    pub tallies: TallyMap,
    pub price_points: usize,
}

impl BacktestRun {
    pub fn structures(&self) -> u64 {
        self.tallies.structures()
    }
}

pub fn run_backtest(
    series: &PriceSeries,
    increments: Arc<IncrementSet>,
    config: &BacktestConfig,
) -> Result<BacktestRun, TraderError> {
    if series.len() < config.trier.window_size + config.trier.outcome_horizon {
        return Err(TraderError::Data {
            reason: format!(
                "{} price points cannot fill a window of {} plus a horizon of {}",
                series.len(),
                config.trier.window_size,
                config.trier.outcome_horizon
            ),
        });
    }
    info!(
        points = series.len(),
        increments = increments.len(),
        window_size = config.trier.window_size,
        outcome_horizon = config.trier.outcome_horizon,
        "running backtest"
    );

    let tallies = run_trier(series.points(), &increments, &config.trier)?;
    let models = aggregate(&tallies, increments, &config.criteria);
    Ok(BacktestRun {
        models,
        tallies,
        price_points: series.len(),
    })
}
