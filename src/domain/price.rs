//! Price points and strictly time-ordered price series.

use chrono::{DateTime, Utc};
use tracing::warn;

use super::error::TraderError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl PricePoint {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        PricePoint { timestamp, price }
    }

    /// Finite and strictly positive.
    pub fn has_valid_price(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// A price history whose timestamps strictly increase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strict construction: the first invalid point is an error.
    pub fn try_from_points(points: Vec<PricePoint>) -> Result<Self, TraderError> {
        let mut series = PriceSeries::new();
        for point in points {
            series.push(point)?;
        }
        Ok(series)
    }

    /// Lenient construction: invalid, duplicate and out-of-order points are dropped.
    /// Returns the series and the number of points dropped.
    pub fn from_points_lossy(points: Vec<PricePoint>) -> (Self, usize) {
        let mut series = PriceSeries::new();
        let mut dropped = 0;
        for point in points {
            if let Err(e) = series.push(point) {
                warn!(error = %e, "dropping price point");
                dropped += 1;
            }
        }
        (series, dropped)
    }

    pub fn push(&mut self, point: PricePoint) -> Result<(), TraderError> {
        if !point.has_valid_price() {
            return Err(TraderError::Data {
                reason: format!("invalid price {} at {}", point.price, point.timestamp),
            });
        }
        if let Some(last) = self.points.last() {
            if point.timestamp <= last.timestamp {
                return Err(TraderError::OutOfOrder {
                    timestamp: point.timestamp,
                    previous: last.timestamp,
                });
            }
        }
        self.points.push(point);
        Ok(())
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }
}
