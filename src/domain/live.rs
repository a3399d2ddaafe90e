//! Live decision engine: rolling window, online pivot extraction and model
//! matching. At most one signal per tick.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use super::error::TraderError;
use super::increment::IncrementSet;
use super::model::{ModelId, ModelSet};
use super::price::PricePoint;
use super::risk::{ExitReason, RiskManager};
use super::signature::ShapeKey;
use super::structure::{extract_pivots, MIN_WINDOW};
use crate::ports::exchange_port::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalReason {
    PatternMatch,
    Exit(ExitReason),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeSignal {
    pub model_id: ModelId,
    pub side: Side,
    pub size_fraction: f64,
    pub reason: SignalReason,
}

impl TradeSignal {
    pub fn buy(model_id: ModelId, size_fraction: f64) -> Self {
        TradeSignal {
            model_id,
            side: Side::Buy,
            size_fraction,
            reason: SignalReason::PatternMatch,
        }
    }

    pub fn sell(model_id: ModelId, reason: ExitReason) -> Self {
        TradeSignal {
            model_id,
            side: Side::Sell,
            size_fraction: 1.0,
            reason: SignalReason::Exit(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveEngine {
    increments: Arc<IncrementSet>,
    window_size: usize,
    size_fraction: f64,
    buffer: VecDeque<PricePoint>,
    ticks: u64,
    shape: Option<ShapeKey>,
}

impl LiveEngine {
    /// `increments` must be the vocabulary `models` was built with.
    pub fn new(
        models: &ModelSet,
        increments: Arc<IncrementSet>,
        window_size: usize,
        size_fraction: f64,
    ) -> Result<Self, TraderError> {
        if increments.as_ref() != models.increments().as_ref() {
            return Err(TraderError::IncrementMismatch);
        }
        if window_size < MIN_WINDOW {
            return Err(TraderError::invalid(
                "backtest",
                "window_size",
                format!("window_size must be at least {MIN_WINDOW}"),
            ));
        }
        Ok(LiveEngine {
            increments,
            window_size,
            size_fraction,
            buffer: VecDeque::with_capacity(window_size),
            ticks: 0,
            shape: None,
        })
    }

    /// Accept one tick and refresh the current shape.
    ///
    /// Invalid prices and ticks not after the previous one are rejected and
    /// leave the engine untouched.
    pub fn observe(&mut self, point: PricePoint) -> Result<(), TraderError> {
        if !point.has_valid_price() {
            return Err(TraderError::Data {
                reason: format!("invalid price {} at {}", point.price, point.timestamp),
            });
        }
        if let Some(last) = self.buffer.back() {
            if point.timestamp <= last.timestamp {
                return Err(TraderError::OutOfOrder {
                    timestamp: point.timestamp,
                    previous: last.timestamp,
                });
            }
        }

        self.buffer.push_back(point);
        if self.buffer.len() > self.window_size {
            self.buffer.pop_front();
        }
        self.ticks += 1;

        self.shape = if self.buffer.len() == self.window_size {
            let offset = (self.ticks as usize).saturating_sub(self.window_size);
            extract_pivots(self.buffer.make_contiguous(), offset)
                .map(|pivots| ShapeKey::from_pivots(&pivots, &self.increments))
        } else {
            None
        };
        Ok(())
    }

    /// Shape of the window ending at the latest tick.
    pub fn current_shape(&self) -> Option<ShapeKey> {
        self.shape
    }

    pub fn last_point(&self) -> Option<&PricePoint> {
        self.buffer.back()
    }

    /// Ticks accepted so far; the latest tick's index is `ticks() - 1`.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn increments(&self) -> &Arc<IncrementSet> {
        &self.increments
    }

    /// Signal for the latest tick, if any.
    pub fn decide(&self, models: &ModelSet, risk: &RiskManager) -> Option<TradeSignal> {
        let point = self.buffer.back()?;
        let tick = self.ticks.saturating_sub(1);

        if let Some(position) = risk.position() {
            return risk
                .exit_condition(point.price, tick)
                .map(|reason| TradeSignal::sell(position.model_id, reason));
        }
        if !risk.can_enter() {
            return None;
        }

        let shape = self.shape?;
        let model = models.first_match(&shape)?;
        debug!(model = %model.id, signature = %model.signature, price = point.price, "pattern matched");
        Some(TradeSignal::buy(model.id, self.size_fraction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{aggregate, ActivationCriteria};
    use crate::domain::risk::RiskConfig;
    use crate::domain::signature::PatternSignature;
    use crate::domain::trier::{BacktestTally, TallyMap};
    use chrono::{TimeZone, Utc};

    fn increments() -> Arc<IncrementSet> {
        Arc::new(IncrementSet::from_values(vec![1.0, 1.01, 1.02]).unwrap())
    }

    fn tick(minute: i64, price: f64) -> PricePoint {
        PricePoint::new(Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap(), price)
    }

    fn models_for(prices: &[f64], inc: Arc<IncrementSet>) -> ModelSet {
        let mut engine = LiveEngine::new(&empty_models(inc.clone()), inc.clone(), prices.len(), 0.05)
            .unwrap();
        for (i, &p) in prices.iter().enumerate() {
            engine.observe(tick(i as i64, p)).unwrap();
        }
        let shape = engine.current_shape().unwrap();
        let mut tallies = TallyMap::new();
        tallies.insert(
            PatternSignature::new(shape, 2),
            BacktestTally {
                occurrences: 10,
                wins: 9,
                losses: 1,
            },
        );
        aggregate(
            &tallies,
            inc,
            &ActivationCriteria {
                min_occurrences: 5,
                activation_threshold: 0.7,
            },
        )
    }

    fn empty_models(inc: Arc<IncrementSet>) -> ModelSet {
        aggregate(
            &TallyMap::new(),
            inc,
            &ActivationCriteria {
                min_occurrences: 1,
                activation_threshold: 0.5,
            },
        )
    }

    #[test]
    fn rejects_foreign_vocabulary() {
        let models = empty_models(increments());
        let other = Arc::new(IncrementSet::from_values(vec![1.0, 1.05]).unwrap());
        let err = LiveEngine::new(&models, other, 4, 0.05).unwrap_err();
        assert!(matches!(err, TraderError::IncrementMismatch));
    }

    #[test]
    fn equal_vocabulary_in_a_new_arc_is_accepted() {
        let models = empty_models(increments());
        assert!(LiveEngine::new(&models, increments(), 4, 0.05).is_ok());
    }

    #[test]
    fn out_of_order_and_invalid_ticks_are_dropped() {
        let inc = increments();
        let mut engine = LiveEngine::new(&empty_models(inc.clone()), inc, 4, 0.05).unwrap();
        engine.observe(tick(5, 100.0)).unwrap();
        assert!(matches!(
            engine.observe(tick(5, 101.0)),
            Err(TraderError::OutOfOrder { .. })
        ));
        assert!(matches!(
            engine.observe(tick(6, f64::NAN)),
            Err(TraderError::Data { .. })
        ));
        assert!(matches!(
            engine.observe(tick(7, -3.0)),
            Err(TraderError::Data { .. })
        ));
        assert_eq!(engine.ticks(), 1);
    }

    #[test]
    fn shape_appears_once_window_is_full() {
        let inc = increments();
        let mut engine = LiveEngine::new(&empty_models(inc.clone()), inc, 4, 0.05).unwrap();
        for (i, p) in [100.0, 102.0, 99.0].into_iter().enumerate() {
            engine.observe(tick(i as i64, p)).unwrap();
            assert!(engine.current_shape().is_none());
        }
        engine.observe(tick(3, 103.0)).unwrap();
        assert!(engine.current_shape().is_some());
    }

    #[test]
    fn match_emits_single_buy() {
        let inc = increments();
        let prices = [100.0, 102.0, 99.0, 103.0];
        let models = models_for(&prices, inc.clone());
        let risk = RiskManager::new(RiskConfig::default());
        let mut engine = LiveEngine::new(&models, inc, 4, 0.05).unwrap();
        for (i, &p) in prices.iter().enumerate() {
            engine.observe(tick(i as i64, p)).unwrap();
        }
        let signal = engine.decide(&models, &risk).unwrap();
        assert_eq!(signal.side, Side::Buy);
        assert_eq!(signal.model_id, ModelId(0));
        assert_eq!(signal.reason, SignalReason::PatternMatch);
        assert!((signal.size_fraction - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn no_match_no_signal() {
        let inc = increments();
        let models = models_for(&[100.0, 102.0, 99.0, 103.0], inc.clone());
        let risk = RiskManager::new(RiskConfig::default());
        let mut engine = LiveEngine::new(&models, inc, 4, 0.05).unwrap();
        for (i, p) in [100.0, 95.0, 101.0, 94.0].into_iter().enumerate() {
            engine.observe(tick(i as i64, p)).unwrap();
        }
        assert!(engine.decide(&models, &risk).is_none());
    }
}
