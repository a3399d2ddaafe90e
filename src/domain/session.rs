//! Trading session: the explicit context for one live run.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::error::TraderError;
use super::increment::IncrementSet;
use super::live::LiveEngine;
use super::model::{Model, ModelSet};
use super::position::{ClosedTrade, Position};
use super::price::PricePoint;
use super::risk::{CycleState, RiskConfig, RiskManager};
use crate::ports::exchange_port::ExchangeClient;

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// The tick was rejected as bad data and ignored.
    Skipped(TraderError),
    Idle,
    Holding,
    Opened(Position),
    Closed(ClosedTrade),
    /// A market sell is outstanding.
    ExitPending,
    /// A signal could not be executed; no position was opened.
    Failed(TraderError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub enabled_models: Vec<Model>,
    pub position: Option<Position>,
    pub state: CycleState,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub closed_trades: usize,
    pub ticks: u64,
}

pub struct TradingSession<E: ExchangeClient> {
    models: ModelSet,
    engine: LiveEngine,
    risk: RiskManager,
    exchange: E,
}

impl<E: ExchangeClient> TradingSession<E> {
    pub fn new(
        models: ModelSet,
        increments: Arc<IncrementSet>,
        window_size: usize,
        risk: RiskConfig,
        exchange: E,
    ) -> Result<Self, TraderError> {
        let engine = LiveEngine::new(&models, increments, window_size, risk.size_fraction)?;
        info!(
            models = models.len(),
            window_size,
            "trading session started"
        );
        Ok(TradingSession {
            models,
            engine,
            risk: RiskManager::new(risk),
            exchange,
        })
    }

    /// Run one tick to completion.
    ///
    /// Bad ticks and failed executions come back as outcomes; only internal
    /// faults are errors.
    pub fn on_tick(&mut self, point: PricePoint) -> Result<TickOutcome, TraderError> {
        if let Err(e) = self.engine.observe(point) {
            warn!(error = %e, "tick skipped");
            return Ok(TickOutcome::Skipped(e));
        }
        let tick = self.engine.ticks() - 1;

        let monitored = match self.risk.monitor(&point, &mut self.models, &mut self.exchange) {
            Ok(outcome) => outcome,
            Err(e) => return Self::failed(e),
        };
        if matches!(monitored, TickOutcome::Closed(_) | TickOutcome::ExitPending) {
            return Ok(monitored);
        }

        let Some(signal) = self.engine.decide(&self.models, &self.risk) else {
            return Ok(monitored);
        };
        debug!(model = %signal.model_id, side = ?signal.side, tick, "signal");
        match self
            .risk
            .execute(&signal, &point, tick, &mut self.models, &mut self.exchange)
        {
            Ok(outcome) => Ok(outcome),
            Err(e) => Self::failed(e),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            enabled_models: self.models.enabled().cloned().collect(),
            position: self.risk.position().cloned(),
            state: self.risk.state(),
            halted: self.risk.is_halted(),
            halt_reason: self.risk.halt_reason().map(str::to_string),
            closed_trades: self.risk.closed_trades().len(),
            ticks: self.engine.ticks(),
        }
    }

    pub fn clear_halt(&mut self) {
        self.risk.clear_halt();
    }

    /// Close any open position at market before returning.
    pub fn shutdown(&mut self) -> Result<Option<ClosedTrade>, TraderError> {
        let Some(last) = self.engine.last_point().copied() else {
            return Ok(None);
        };
        let trade = self
            .risk
            .shutdown(last.price, last.timestamp, &mut self.models, &mut self.exchange)?;
        info!(
            closed_trades = self.risk.closed_trades().len(),
            enabled_models = self.models.enabled().count(),
            "trading session stopped"
        );
        Ok(trade)
    }

    pub fn models(&self) -> &ModelSet {
        &self.models
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        self.risk.closed_trades()
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    pub fn exchange_mut(&mut self) -> &mut E {
        &mut self.exchange
    }

    fn failed(e: TraderError) -> Result<TickOutcome, TraderError> {
        match e {
            TraderError::InvalidTransition { .. } | TraderError::IncrementMismatch => Err(e),
            other => {
                let transient = matches!(&other, TraderError::Exchange(e) if e.is_transient());
                warn!(error = %other, transient, "signal not executed");
                Ok(TickOutcome::Failed(other))
            }
        }
    }
}
