//! Risk manager: order sizing, position supervision, the slippage halt and
//! live model performance.
//!
//! Every trade cycle walks the [`CycleState`] machine; a transition the machine
//! does not allow is reported as [`TraderError::InvalidTransition`].

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::error::{ExecutionError, TraderError};
use super::execution::{order_quantity, relative_slippage};
use super::live::{SignalReason, TradeSignal};
use super::model::ModelSet;
use super::position::{ClosedTrade, EntryFill, Position, PositionStatus};
use super::price::PricePoint;
use super::session::TickOutcome;
use crate::ports::exchange_port::{ExchangeClient, OrderId, OrderRequest, Side};

const SHUTDOWN_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskConfig {
    /// Fraction of the available balance committed per entry.
    pub size_fraction: f64,
    /// Stop distance below entry, as a fraction of the entry price.
    pub max_adverse_move: f64,
    pub slippage_threshold: f64,
    pub deactivation_threshold: f64,
    pub min_live_trades: u32,
    pub min_order_quantity: f64,
    /// Ticks a position may be held before a timed exit; 0 disables.
    pub max_hold_ticks: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            size_fraction: 0.05,
            max_adverse_move: 0.02,
            slippage_threshold: 0.005,
            deactivation_threshold: 0.60,
            min_live_trades: 20,
            min_order_quantity: 0.00001,
            max_hold_ticks: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    SignalMatched,
    BuyPlaced,
    PositionOpen,
    LimitFilled,
    StopTriggered,
    TimeExit,
    SlippageAbort,
    MarketSell,
    ClosedProfit,
    ClosedLoss,
    ClosedManual,
}

impl CycleState {
    pub fn can_transition_to(self, next: CycleState) -> bool {
        use CycleState::*;
        matches!(
            (self, next),
            (Idle, SignalMatched)
                | (SignalMatched, BuyPlaced | Idle)
                | (BuyPlaced, PositionOpen | Idle)
                | (PositionOpen, LimitFilled | StopTriggered | TimeExit | SlippageAbort)
                | (LimitFilled, ClosedProfit)
                | (StopTriggered | TimeExit, MarketSell)
                | (MarketSell, ClosedLoss | ClosedManual)
                | (SlippageAbort, ClosedManual)
                | (ClosedProfit | ClosedLoss | ClosedManual, Idle)
        )
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "IDLE",
            CycleState::SignalMatched => "SIGNAL_MATCHED",
            CycleState::BuyPlaced => "BUY_PLACED",
            CycleState::PositionOpen => "POSITION_OPEN",
            CycleState::LimitFilled => "LIMIT_FILLED",
            CycleState::StopTriggered => "STOP_TRIGGERED",
            CycleState::TimeExit => "TIME_EXIT",
            CycleState::SlippageAbort => "SLIPPAGE_ABORT",
            CycleState::MarketSell => "MARKET_SELL",
            CycleState::ClosedProfit => "CLOSED_PROFIT",
            CycleState::ClosedLoss => "CLOSED_LOSS",
            CycleState::ClosedManual => "CLOSED_MANUAL",
        };
        f.write_str(name)
    }
}

/// Why an open position is being market-sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TimeExit,
    Shutdown,
    Slippage,
}

impl ExitReason {
    pub fn status(self) -> PositionStatus {
        match self {
            ExitReason::StopLoss => PositionStatus::ClosedStop,
            _ => PositionStatus::ClosedManual,
        }
    }

    /// States walked from POSITION_OPEN to the outstanding market sell.
    fn path(self) -> &'static [CycleState] {
        match self {
            ExitReason::StopLoss => &[CycleState::StopTriggered, CycleState::MarketSell],
            ExitReason::TimeExit | ExitReason::Shutdown => {
                &[CycleState::TimeExit, CycleState::MarketSell]
            }
            ExitReason::Slippage => &[CycleState::SlippageAbort],
        }
    }

    fn closed_state(self) -> CycleState {
        match self {
            ExitReason::StopLoss => CycleState::ClosedLoss,
            _ => CycleState::ClosedManual,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitReason::StopLoss => "stop-loss",
            ExitReason::TimeExit => "time exit",
            ExitReason::Shutdown => "shutdown",
            ExitReason::Slippage => "slippage abort",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingExit {
    reason: ExitReason,
    reference_price: f64,
    order: Option<OrderId>,
}

/// Owns the single position and everything that can happen to it.
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    state: CycleState,
    position: Option<Position>,
    limit_order: Option<OrderId>,
    pending_exit: Option<PendingExit>,
    halt: Option<String>,
    closed: Vec<ClosedTrade>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        RiskManager {
            config,
            state: CycleState::Idle,
            position: None,
            limit_order: None,
            pending_exit: None,
            halt: None,
            closed: Vec::new(),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt.as_deref()
    }

    pub fn clear_halt(&mut self) {
        if let Some(reason) = self.halt.take() {
            info!(%reason, "slippage halt cleared");
        }
    }

    /// Whether a BUY may be acted on right now.
    pub fn can_enter(&self) -> bool {
        self.state == CycleState::Idle && self.position.is_none() && self.halt.is_none()
    }

    /// `balance * size_fraction / price`, refused below the exchange minimum.
    pub fn size_order(
        &self,
        balance: f64,
        size_fraction: f64,
        price: f64,
    ) -> Result<f64, ExecutionError> {
        if balance <= 0.0 || !balance.is_finite() {
            return Err(ExecutionError::NoBalance);
        }
        let quantity = order_quantity(balance, size_fraction, price);
        if quantity < self.config.min_order_quantity {
            return Err(ExecutionError::BelowMinimum {
                quantity,
                minimum: self.config.min_order_quantity,
            });
        }
        Ok(quantity)
    }

    /// Exit rule that fires for the open position at `price`, if any.
    pub fn exit_condition(&self, price: f64, tick: u64) -> Option<ExitReason> {
        if self.state != CycleState::PositionOpen || self.pending_exit.is_some() {
            return None;
        }
        let position = self.position.as_ref()?;
        if position.should_stop_loss(price) {
            return Some(ExitReason::StopLoss);
        }
        if self.config.max_hold_ticks > 0 && position.ticks_held(tick) >= self.config.max_hold_ticks
        {
            return Some(ExitReason::TimeExit);
        }
        None
    }

    /// Per-tick supervision: finish a pending exit, poll the resting limit sell,
    /// or retry placing it.
    pub fn monitor(
        &mut self,
        point: &PricePoint,
        models: &mut ModelSet,
        exchange: &mut dyn ExchangeClient,
    ) -> Result<TickOutcome, TraderError> {
        if self.pending_exit.is_some() {
            return self.drive_exit(point.timestamp, models, exchange);
        }
        let (quantity, target) = match &self.position {
            Some(p) => {
                debug!(
                    price = point.price,
                    pnl = p.unrealized_pnl(point.price),
                    at_target = p.reached_target(point.price),
                    "holding"
                );
                (p.quantity, p.target_sell_price)
            }
            None => return Ok(TickOutcome::Idle),
        };

        match self.limit_order {
            Some(id) => {
                if let Some(trade) = self.settle_limit(id, point.timestamp, models, exchange)? {
                    return Ok(TickOutcome::Closed(trade));
                }
            }
            None => self.place_limit(quantity, target, exchange),
        }
        Ok(TickOutcome::Holding)
    }

    /// Act on a signal from the live engine.
    pub fn execute(
        &mut self,
        signal: &TradeSignal,
        point: &PricePoint,
        tick: u64,
        models: &mut ModelSet,
        exchange: &mut dyn ExchangeClient,
    ) -> Result<TickOutcome, TraderError> {
        match (signal.side, signal.reason) {
            (Side::Buy, _) => self.enter(signal, point, tick, models, exchange),
            (Side::Sell, SignalReason::Exit(reason)) => {
                self.begin_exit(reason, point.price, point.timestamp, models, exchange)
            }
            (Side::Sell, SignalReason::PatternMatch) => Err(ExecutionError::Rejected {
                reason: "sell signal without an exit reason".to_string(),
            }
            .into()),
        }
    }

    /// Drive any open position to a closed state.
    pub fn shutdown(
        &mut self,
        reference_price: f64,
        at: DateTime<Utc>,
        models: &mut ModelSet,
        exchange: &mut dyn ExchangeClient,
    ) -> Result<Option<ClosedTrade>, TraderError> {
        if self.position.is_none() {
            return Ok(None);
        }
        if self.pending_exit.is_none() {
            let outcome = self.begin_exit(ExitReason::Shutdown, reference_price, at, models, exchange)?;
            if let TickOutcome::Closed(trade) = outcome {
                return Ok(Some(trade));
            }
        }
        for attempt in 1..=SHUTDOWN_ATTEMPTS {
            if let TickOutcome::Closed(trade) = self.drive_exit(at, models, exchange)? {
                return Ok(Some(trade));
            }
            debug!(attempt, "shutdown sell not filled yet");
        }
        Err(ExecutionError::NotFilled.into())
    }

    fn enter(
        &mut self,
        signal: &TradeSignal,
        point: &PricePoint,
        tick: u64,
        models: &mut ModelSet,
        exchange: &mut dyn ExchangeClient,
    ) -> Result<TickOutcome, TraderError> {
        if let Some(reason) = &self.halt {
            return Err(TraderError::Halted {
                reason: reason.clone(),
            });
        }
        self.transition(CycleState::SignalMatched)?;
        match self.try_enter(signal, point, tick, models, exchange) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if matches!(self.state, CycleState::SignalMatched | CycleState::BuyPlaced) {
                    self.transition(CycleState::Idle)?;
                }
                warn!(model = %signal.model_id, error = %e, "entry failed");
                Err(e)
            }
        }
    }

    fn try_enter(
        &mut self,
        signal: &TradeSignal,
        point: &PricePoint,
        tick: u64,
        models: &mut ModelSet,
        exchange: &mut dyn ExchangeClient,
    ) -> Result<TickOutcome, TraderError> {
        let outcome_increment =
            models
                .outcome_increment(signal.model_id)
                .ok_or_else(|| ExecutionError::Rejected {
                    reason: format!("unknown model {}", signal.model_id),
                })?;
        let balance = exchange.available_balance()?;
        let quantity = self.size_order(balance, signal.size_fraction, point.price)?;

        self.transition(CycleState::BuyPlaced)?;
        let order = exchange.place_order(&OrderRequest::market(Side::Buy, quantity))?;
        let Some(fill) = order.filled_at() else {
            if let Err(e) = exchange.cancel_order(order.order_id) {
                warn!(order = order.order_id, error = %e, "could not cancel unfilled buy");
            }
            return Err(ExecutionError::NotFilled.into());
        };

        self.transition(CycleState::PositionOpen)?;
        let entry = EntryFill {
            model_id: signal.model_id,
            fill_price: fill,
            expected_price: point.price,
            quantity,
            at: point.timestamp,
            tick,
        };
        let position = Position::open(entry, outcome_increment, self.config.max_adverse_move);
        info!(
            model = %signal.model_id,
            entry = fill,
            quantity,
            target = position.target_sell_price,
            stop = position.stop_loss_price,
            "position opened"
        );
        self.position = Some(position.clone());

        let slippage = relative_slippage(point.price, fill);
        if slippage > self.config.slippage_threshold {
            self.trip_halt(format!(
                "buy filled at {fill} against {} ({slippage:.4} slippage)",
                point.price
            ));
            return self.begin_exit(ExitReason::Slippage, point.price, point.timestamp, models, exchange);
        }

        self.place_limit(quantity, position.target_sell_price, exchange);
        Ok(TickOutcome::Opened(position))
    }

    fn place_limit(&mut self, quantity: f64, target: f64, exchange: &mut dyn ExchangeClient) {
        match exchange.place_order(&OrderRequest::limit_sell(quantity, target)) {
            Ok(outcome) => {
                debug!(order = outcome.order_id, target, "limit sell resting");
                self.limit_order = Some(outcome.order_id);
            }
            Err(e) => warn!(error = %e, target, "limit sell not placed, retrying next tick"),
        }
    }

    /// Close in profit if the resting limit sell has filled.
    fn settle_limit(
        &mut self,
        id: OrderId,
        at: DateTime<Utc>,
        models: &mut ModelSet,
        exchange: &mut dyn ExchangeClient,
    ) -> Result<Option<ClosedTrade>, TraderError> {
        let fill = match exchange.poll_order(id) {
            Ok(outcome) => outcome.filled_at(),
            Err(e) => {
                warn!(order = id, error = %e, "limit sell poll failed");
                None
            }
        };
        let Some(fill) = fill else {
            return Ok(None);
        };
        self.limit_order = None;
        self.transition(CycleState::LimitFilled)?;
        self.close(
            fill,
            PositionStatus::ClosedProfit,
            CycleState::ClosedProfit,
            at,
            models,
        )
        .map(Some)
    }

    fn begin_exit(
        &mut self,
        reason: ExitReason,
        reference_price: f64,
        at: DateTime<Utc>,
        models: &mut ModelSet,
        exchange: &mut dyn ExchangeClient,
    ) -> Result<TickOutcome, TraderError> {
        if let Some(id) = self.limit_order {
            if let Some(trade) = self.settle_limit(id, at, models, exchange)? {
                return Ok(TickOutcome::Closed(trade));
            }
            if let Err(e) = exchange.cancel_order(id) {
                warn!(order = id, error = %e, "limit sell cancel rejected");
                // the limit may have filled after the poll above
                if let Some(trade) = self.settle_limit(id, at, models, exchange)? {
                    return Ok(TickOutcome::Closed(trade));
                }
                return Err(e.into());
            }
            self.limit_order = None;
        }
        for &state in reason.path() {
            self.transition(state)?;
        }
        info!(%reason, price = reference_price, "exiting position");
        self.pending_exit = Some(PendingExit {
            reason,
            reference_price,
            order: None,
        });
        self.drive_exit(at, models, exchange)
    }

    fn drive_exit(
        &mut self,
        at: DateTime<Utc>,
        models: &mut ModelSet,
        exchange: &mut dyn ExchangeClient,
    ) -> Result<TickOutcome, TraderError> {
        let Some(mut pending) = self.pending_exit else {
            return Ok(TickOutcome::Idle);
        };
        let Some(quantity) = self.position.as_ref().map(|p| p.quantity) else {
            self.pending_exit = None;
            return Ok(TickOutcome::Idle);
        };

        let outcome = match pending.order {
            Some(id) => exchange.poll_order(id)?,
            None => {
                let outcome = exchange.place_order(&OrderRequest::market(Side::Sell, quantity))?;
                pending.order = Some(outcome.order_id);
                self.pending_exit = Some(pending);
                outcome
            }
        };
        let Some(fill) = outcome.filled_at() else {
            debug!(order = outcome.order_id, "market sell not filled yet");
            return Ok(TickOutcome::ExitPending);
        };
        self.pending_exit = None;

        let slippage = relative_slippage(pending.reference_price, fill);
        if slippage > self.config.slippage_threshold && self.halt.is_none() {
            self.trip_halt(format!(
                "sell filled at {fill} against {} ({slippage:.4} slippage)",
                pending.reference_price
            ));
        }
        let trade = self.close(
            fill,
            pending.reason.status(),
            pending.reason.closed_state(),
            at,
            models,
        )?;
        Ok(TickOutcome::Closed(trade))
    }

    fn close(
        &mut self,
        exit_price: f64,
        status: PositionStatus,
        closed_state: CycleState,
        at: DateTime<Utc>,
        models: &mut ModelSet,
    ) -> Result<ClosedTrade, TraderError> {
        self.transition(closed_state)?;
        let Some(mut position) = self.position.take() else {
            return Err(TraderError::InvalidTransition {
                from: self.state.to_string(),
                to: CycleState::Idle.to_string(),
            });
        };
        position.status = status;
        let trade = ClosedTrade::from_position(&position, exit_price, at);
        info!(
            model = %trade.model_id,
            status = ?trade.status,
            entry = trade.entry_price,
            exit = trade.exit_price,
            pnl = trade.pnl,
            "position closed"
        );
        self.record_result(&trade, models);
        self.transition(CycleState::Idle)?;
        self.closed.push(trade.clone());
        Ok(trade)
    }

    fn record_result(&self, trade: &ClosedTrade, models: &mut ModelSet) {
        let (trades, rate) = match models.record_live_result(trade.model_id, trade.is_win()) {
            Some(m) => (m.live_trades(), m.live_win_rate()),
            None => {
                warn!(model = %trade.model_id, "closed trade for unknown model");
                return;
            }
        };
        let underperforming = rate.is_some_and(|r| r < self.config.deactivation_threshold);
        if trades >= self.config.min_live_trades
            && underperforming
            && models.deactivate(trade.model_id)
        {
            warn!(
                model = %trade.model_id,
                live_trades = trades,
                live_win_rate = rate.unwrap_or_default(),
                "model deactivated"
            );
        }
    }

    fn trip_halt(&mut self, reason: String) {
        warn!(%reason, "slippage halt tripped");
        self.halt = Some(reason);
    }

    fn transition(&mut self, next: CycleState) -> Result<(), TraderError> {
        if !self.state.can_transition_to(next) {
            return Err(TraderError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(from = %self.state, to = %next, "cycle transition");
        self.state = next;
        Ok(())
    }
}
