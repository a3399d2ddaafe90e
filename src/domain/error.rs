//! Domain error types.

use chrono::{DateTime, Utc};

/// Why an order could not be turned into a position.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("order quantity {quantity} below exchange minimum {minimum}")]
    BelowMinimum { quantity: f64, minimum: f64 },

    #[error("no available balance to size the order")]
    NoBalance,

    #[error("order was not filled")]
    NotFilled,

    #[error("exchange rejected the order: {reason}")]
    Rejected { reason: String },
}

/// Failures reported by an exchange client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExchangeError {
    #[error("exchange call timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("exchange rejected request: {reason}")]
    Rejected { reason: String },

    #[error("unknown order {0}")]
    UnknownOrder(u64),

    #[error("exchange transport error: {reason}")]
    Transport { reason: String },
}

impl ExchangeError {
    /// Timeouts and transport failures are worth another tick; rejections are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Timeout { .. } | ExchangeError::Transport { .. }
        )
    }
}

/// Top-level error type for patterntrader.
#[derive(Debug, thiserror::Error)]
pub enum TraderError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("price at {timestamp} is not after {previous}")]
    OutOfOrder {
        timestamp: DateTime<Utc>,
        previous: DateTime<Utc>,
    },

    #[error("increment vocabulary differs from the one the models were built with")]
    IncrementMismatch,

    #[error("illegal cycle transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("new entries halted: {reason}")]
    Halted { reason: String },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TraderError {
    pub(crate) fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        TraderError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(
            self,
            TraderError::ConfigParse { .. }
                | TraderError::ConfigMissing { .. }
                | TraderError::ConfigInvalid { .. }
        )
    }
}

impl From<&TraderError> for std::process::ExitCode {
    fn from(err: &TraderError) -> Self {
        let code: u8 = match err {
            TraderError::Io(_) => 1,
            TraderError::ConfigParse { .. }
            | TraderError::ConfigMissing { .. }
            | TraderError::ConfigInvalid { .. } => 2,
            TraderError::Exchange(_) | TraderError::Execution(_) => 3,
            TraderError::Halted { .. } => 4,
            TraderError::Data { .. } | TraderError::OutOfOrder { .. } => 5,
            TraderError::IncrementMismatch | TraderError::InvalidTransition { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
