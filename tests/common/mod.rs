#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use patterntrader::domain::error::ExchangeError;
use patterntrader::domain::increment::IncrementSet;
use patterntrader::domain::model::{aggregate, ActivationCriteria, ModelSet};
pub use patterntrader::domain::price::{PricePoint, PriceSeries};
use patterntrader::domain::risk::RiskConfig;
use patterntrader::domain::signature::{PatternSignature, ShapeKey};
use patterntrader::domain::structure::extract_pivots;
use patterntrader::domain::trier::{BacktestTally, TallyMap};
use patterntrader::ports::exchange_port::{
    ExchangeClient, OrderId, OrderKind, OrderOutcome, OrderRequest, Side,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Exchange double with scripted fills and failures.
///
/// Market orders fill at the last price, buys shifted by `buy_slippage`;
/// limit sells fill once `set_price` reaches them.
pub struct MockExchange {
    pub balance: f64,
    pub price: f64,
    pub buy_slippage: f64,
    /// A cancel fills the limit first and is then rejected.
    pub fill_on_cancel: bool,
    pub failures: VecDeque<ExchangeError>,
    pub orders: BTreeMap<OrderId, (OrderRequest, Option<f64>)>,
    pub placed: Vec<OrderRequest>,
    pub cancelled: Vec<OrderId>,
    next_id: OrderId,
}

impl MockExchange {
    pub fn new(balance: f64) -> Self {
        Self {
            balance,
            price: 0.0,
            buy_slippage: 0.0,
            fill_on_cancel: false,
            failures: VecDeque::new(),
            orders: BTreeMap::new(),
            placed: Vec::new(),
            cancelled: Vec::new(),
            next_id: 0,
        }
    }

    pub fn with_buy_slippage(mut self, relative: f64) -> Self {
        self.buy_slippage = relative;
        self
    }

    /// Fail the next `place_order` call with `error`.
    pub fn with_failure(mut self, error: ExchangeError) -> Self {
        self.failures.push_back(error);
        self
    }

    pub fn set_price(&mut self, price: f64) {
        self.price = price;
        for (request, fill) in self.orders.values_mut() {
            if let (OrderKind::Limit, None, Some(limit)) = (request.kind, *fill, request.price) {
                if price >= limit {
                    *fill = Some(limit);
                }
            }
        }
    }

    pub fn open_limits(&self) -> usize {
        self.orders
            .values()
            .filter(|(r, fill)| r.kind == OrderKind::Limit && fill.is_none())
            .count()
    }

    pub fn market_buys(&self) -> usize {
        self.placed
            .iter()
            .filter(|r| r.kind == OrderKind::Market && r.side == Side::Buy)
            .count()
    }
}

impl ExchangeClient for MockExchange {
    fn place_order(&mut self, request: &OrderRequest) -> Result<OrderOutcome, ExchangeError> {
        if let Some(err) = self.failures.pop_front() {
            return Err(err);
        }
        self.next_id += 1;
        self.placed.push(*request);
        let fill = match (request.kind, request.side) {
            (OrderKind::Market, Side::Buy) => Some(self.price * (1.0 + self.buy_slippage)),
            (OrderKind::Market, Side::Sell) => Some(self.price),
            (OrderKind::Limit, _) => None,
        };
        self.orders.insert(self.next_id, (*request, fill));
        Ok(OrderOutcome {
            order_id: self.next_id,
            filled: fill.is_some(),
            fill_price: fill,
        })
    }

    fn poll_order(&mut self, order_id: OrderId) -> Result<OrderOutcome, ExchangeError> {
        let (_, fill) = self
            .orders
            .get(&order_id)
            .ok_or(ExchangeError::UnknownOrder(order_id))?;
        Ok(OrderOutcome {
            order_id,
            filled: fill.is_some(),
            fill_price: *fill,
        })
    }

    fn cancel_order(&mut self, order_id: OrderId) -> Result<(), ExchangeError> {
        if self.fill_on_cancel {
            if let Some((request, fill)) = self.orders.get_mut(&order_id) {
                *fill = request.price;
                return Err(ExchangeError::Rejected {
                    reason: format!("order {order_id} already filled"),
                });
            }
        }
        self.orders
            .remove(&order_id)
            .ok_or(ExchangeError::UnknownOrder(order_id))?;
        self.cancelled.push(order_id);
        Ok(())
    }

    fn available_balance(&self) -> Result<f64, ExchangeError> {
        Ok(self.balance)
    }
}

pub fn point(minute: i64, price: f64) -> PricePoint {
    PricePoint::new(
        Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap(),
        price,
    )
}

pub fn points(prices: &[f64]) -> Vec<PricePoint> {
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| point(i as i64, p))
        .collect()
}

pub fn series(prices: &[f64]) -> PriceSeries {
    PriceSeries::try_from_points(points(prices)).unwrap()
}

/// Deterministic choppy walk around `start`.
pub fn choppy_prices(count: usize, start: f64, seed: u64) -> Vec<f64> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    let mut price = start;
    (0..count)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let step = ((state >> 33) % 61) as f64 / 1000.0 - 0.03;
            price = (price * (1.0 + step)).max(1.0);
            price
        })
        .collect()
}

pub fn small_increments() -> Arc<IncrementSet> {
    Arc::new(IncrementSet::from_values(vec![1.0, 1.01, 1.02]).unwrap())
}

/// Shape of a window of exactly the given prices.
pub fn shape_of(prices: &[f64], increments: &IncrementSet) -> ShapeKey {
    let pivots = extract_pivots(&points(prices), 0).unwrap();
    ShapeKey::from_pivots(&pivots, increments)
}

/// A model set whose only model is `shape` with outcome increment index `outcome`.
pub fn single_model(shape: ShapeKey, outcome: usize, increments: Arc<IncrementSet>) -> ModelSet {
    let mut tallies = TallyMap::new();
    tallies.insert(
        PatternSignature::new(shape, outcome),
        BacktestTally {
            occurrences: 100,
            wins: 80,
            losses: 20,
        },
    );
    aggregate(
        &tallies,
        increments,
        &ActivationCriteria {
            min_occurrences: 10,
            activation_threshold: 0.7,
        },
    )
}

pub fn risk_config() -> RiskConfig {
    RiskConfig {
        size_fraction: 0.1,
        max_adverse_move: 0.02,
        slippage_threshold: 0.005,
        deactivation_threshold: 0.6,
        min_live_trades: 20,
        min_order_quantity: 0.0001,
        max_hold_ticks: 0,
    }
}
