//! Core domain types and logic.

pub mod backtest;
pub mod config_validation;
pub mod error;
pub mod execution;
pub mod increment;
pub mod live;
pub mod model;
pub mod position;
pub mod price;
pub mod risk;
pub mod session;
pub mod signature;
pub mod structure;
pub mod trier;
