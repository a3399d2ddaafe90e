//! In-process paper exchange for simulation runs.
//!
//! Market orders fill immediately at the last price with the configured
//! slippage; limit sells rest until a later price reaches them and then fill at
//! the limit.

use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::error::ExchangeError;
use crate::domain::execution::{apply_slippage_buy, apply_slippage_sell};
use crate::ports::exchange_port::{
    ExchangeClient, OrderId, OrderKind, OrderOutcome, OrderRequest, Side,
};

const QUANTITY_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperConfig {
    pub initial_balance: f64,
    /// Percent applied against the taker on market orders.
    pub slippage_pct: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        PaperConfig {
            initial_balance: 10_000.0,
            slippage_pct: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PaperOrder {
    request: OrderRequest,
    fill_price: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PaperExchange {
    config: PaperConfig,
    cash: f64,
    holdings: f64,
    reserved: f64,
    price: Option<f64>,
    next_id: OrderId,
    orders: BTreeMap<OrderId, PaperOrder>,
}

impl PaperExchange {
    pub fn new(config: PaperConfig) -> Self {
        PaperExchange {
            config,
            cash: config.initial_balance,
            holdings: 0.0,
            reserved: 0.0,
            price: None,
            next_id: 0,
            orders: BTreeMap::new(),
        }
    }

    /// Move the market; resting limit sells at or below `price` fill.
    pub fn set_price(&mut self, price: f64) {
        self.price = Some(price);
        for (id, order) in self.orders.iter_mut() {
            let Some(limit) = order.request.price else {
                continue;
            };
            if order.fill_price.is_none() && price >= limit {
                let quantity = order.request.quantity;
                self.holdings -= quantity;
                self.reserved -= quantity;
                self.cash += quantity * limit;
                order.fill_price = Some(limit);
                debug!(order = id, limit, "paper limit sell filled");
            }
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn holdings(&self) -> f64 {
        self.holdings
    }

    /// Cash plus holdings marked at the last price.
    pub fn equity(&self) -> f64 {
        self.cash + self.holdings * self.price.unwrap_or_default()
    }

    fn free_holdings(&self) -> f64 {
        self.holdings - self.reserved
    }

    fn record(&mut self, request: OrderRequest, fill_price: Option<f64>) -> OrderOutcome {
        self.next_id += 1;
        self.orders.insert(
            self.next_id,
            PaperOrder {
                request,
                fill_price,
            },
        );
        OrderOutcome {
            order_id: self.next_id,
            filled: fill_price.is_some(),
            fill_price,
        }
    }
}

fn rejected(reason: impl Into<String>) -> ExchangeError {
    ExchangeError::Rejected {
        reason: reason.into(),
    }
}

impl ExchangeClient for PaperExchange {
    fn place_order(&mut self, request: &OrderRequest) -> Result<OrderOutcome, ExchangeError> {
        if !(request.quantity > 0.0) {
            return Err(rejected("quantity must be positive"));
        }
        let price = self.price.ok_or_else(|| rejected("no market price yet"))?;

        match (request.kind, request.side) {
            (OrderKind::Market, Side::Buy) => {
                let fill = apply_slippage_buy(price, self.config.slippage_pct);
                let cost = fill * request.quantity;
                if cost > self.cash + QUANTITY_EPSILON {
                    return Err(rejected(format!(
                        "insufficient funds: need {cost:.2}, have {:.2}",
                        self.cash
                    )));
                }
                self.cash -= cost;
                self.holdings += request.quantity;
                Ok(self.record(*request, Some(fill)))
            }
            (OrderKind::Market, Side::Sell) => {
                if request.quantity > self.free_holdings() + QUANTITY_EPSILON {
                    return Err(rejected("insufficient holdings"));
                }
                let fill = apply_slippage_sell(price, self.config.slippage_pct);
                self.holdings -= request.quantity;
                self.cash += fill * request.quantity;
                Ok(self.record(*request, Some(fill)))
            }
            (OrderKind::Limit, Side::Sell) => {
                let limit = request.price.ok_or_else(|| rejected("limit order needs a price"))?;
                if request.quantity > self.free_holdings() + QUANTITY_EPSILON {
                    return Err(rejected("insufficient holdings"));
                }
                self.reserved += request.quantity;
                let outcome = self.record(*request, None);
                if price >= limit {
                    self.set_price(price);
                    return self.poll_order(outcome.order_id);
                }
                Ok(outcome)
            }
            (OrderKind::Limit, Side::Buy) => Err(rejected("limit buys are not supported")),
        }
    }

    fn poll_order(&mut self, order_id: OrderId) -> Result<OrderOutcome, ExchangeError> {
        let order = self
            .orders
            .get(&order_id)
            .ok_or(ExchangeError::UnknownOrder(order_id))?;
        Ok(OrderOutcome {
            order_id,
            filled: order.fill_price.is_some(),
            fill_price: order.fill_price,
        })
    }

    fn cancel_order(&mut self, order_id: OrderId) -> Result<(), ExchangeError> {
        let order = self
            .orders
            .get(&order_id)
            .ok_or(ExchangeError::UnknownOrder(order_id))?;
        if order.fill_price.is_some() {
            return Err(rejected(format!("order {order_id} already filled")));
        }
        let quantity = order.request.quantity;
        self.orders.remove(&order_id);
        self.reserved -= quantity;
        Ok(())
    }

    fn available_balance(&self) -> Result<f64, ExchangeError> {
        Ok(self.cash)
    }
}
