//! Exchange client port: order placement, polling, cancellation and balance.
//!
//! Signing and transport belong to the implementation; calls are expected to be
//! bounded by the implementation's own timeout and report it as
//! [`ExchangeError::Timeout`].

use crate::domain::error::ExchangeError;

pub type OrderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderRequest {
    pub side: Side,
    pub kind: OrderKind,
    /// Base-asset quantity.
    pub quantity: f64,
    /// Limit price; `None` for market orders.
    pub price: Option<f64>,
}

impl OrderRequest {
    pub fn market(side: Side, quantity: f64) -> Self {
        OrderRequest {
            side,
            kind: OrderKind::Market,
            quantity,
            price: None,
        }
    }

    pub fn limit_sell(quantity: f64, price: f64) -> Self {
        OrderRequest {
            side: Side::Sell,
            kind: OrderKind::Limit,
            quantity,
            price: Some(price),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderOutcome {
    pub order_id: OrderId,
    pub filled: bool,
    pub fill_price: Option<f64>,
}

impl OrderOutcome {
    /// Fill price of a completed order.
    pub fn filled_at(&self) -> Option<f64> {
        if self.filled { self.fill_price } else { None }
    }
}

pub trait ExchangeClient {
    fn place_order(&mut self, request: &OrderRequest) -> Result<OrderOutcome, ExchangeError>;

    fn poll_order(&mut self, order_id: OrderId) -> Result<OrderOutcome, ExchangeError>;

    fn cancel_order(&mut self, order_id: OrderId) -> Result<(), ExchangeError>;

    /// Quote-currency balance available for new buys.
    fn available_balance(&self) -> Result<f64, ExchangeError>;
}

impl<T: ExchangeClient + ?Sized> ExchangeClient for &mut T {
    fn place_order(&mut self, request: &OrderRequest) -> Result<OrderOutcome, ExchangeError> {
        (**self).place_order(request)
    }

    fn poll_order(&mut self, order_id: OrderId) -> Result<OrderOutcome, ExchangeError> {
        (**self).poll_order(order_id)
    }

    fn cancel_order(&mut self, order_id: OrderId) -> Result<(), ExchangeError> {
        (**self).cancel_order(order_id)
    }

    fn available_balance(&self) -> Result<f64, ExchangeError> {
        (**self).available_balance()
    }
}
