//! The single open position and the record left when it closes.

use chrono::{DateTime, Utc};

use super::model::ModelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    ClosedProfit,
    ClosedStop,
    ClosedManual,
}

/// A filled market buy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryFill {
    pub model_id: ModelId,
    pub fill_price: f64,
    /// Price seen when the signal fired.
    pub expected_price: f64,
    pub quantity: f64,
    pub at: DateTime<Utc>,
    pub tick: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub model_id: ModelId,
    pub entry_price: f64,
    /// Price seen when the signal fired.
    pub expected_entry_price: f64,
    pub quantity: f64,
    pub stop_loss_price: f64,
    pub target_sell_price: f64,
    pub opened_at: DateTime<Utc>,
    pub opened_at_tick: u64,
    pub status: PositionStatus,
}

impl Position {
    /// Long position at the fill price, targeting `fill × outcome_increment`
    /// and stopping at `fill × (1 − max_adverse_move)`.
    pub fn open(fill: EntryFill, outcome_increment: f64, max_adverse_move: f64) -> Self {
        Position {
            model_id: fill.model_id,
            entry_price: fill.fill_price,
            expected_entry_price: fill.expected_price,
            quantity: fill.quantity,
            stop_loss_price: fill.fill_price * (1.0 - max_adverse_move),
            target_sell_price: fill.fill_price * outcome_increment,
            opened_at: fill.at,
            opened_at_tick: fill.tick,
            status: PositionStatus::Open,
        }
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity * (price - self.entry_price)
    }

    pub fn should_stop_loss(&self, price: f64) -> bool {
        price <= self.stop_loss_price
    }

    pub fn reached_target(&self, price: f64) -> bool {
        price >= self.target_sell_price
    }

    pub fn ticks_held(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.opened_at_tick)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub model_id: ModelId,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub status: PositionStatus,
    pub pnl: f64,
}

impl ClosedTrade {
    pub fn from_position(position: &Position, exit_price: f64, closed_at: DateTime<Utc>) -> Self {
        ClosedTrade {
            model_id: position.model_id,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price,
            opened_at: position.opened_at,
            closed_at,
            status: position.status,
            pnl: position.quantity * (exit_price - position.entry_price),
        }
    }

    /// A trade counts as a win only when it sold above its entry.
    pub fn is_win(&self) -> bool {
        self.exit_price > self.entry_price
    }
}
