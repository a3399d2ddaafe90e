//! Increment vocabulary shared by the backtest and the live loop.

use super::error::TraderError;

const ROUNDING: f64 = 1e10;
const TOLERANCE: f64 = 1e-9;

/// Ordered, deduplicated threshold multipliers (e.g. 1.002, 1.004, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct IncrementSet {
    values: Vec<f64>,
}

impl IncrementSet {
    /// Generate `start, start + step, ...` up to and including `stop`.
    pub fn generate(start: f64, stop: f64, step: f64) -> Result<Self, TraderError> {
        if !start.is_finite() || !stop.is_finite() || !step.is_finite() {
            return Err(TraderError::invalid(
                "increments",
                "start",
                "increment bounds must be finite",
            ));
        }
        if step <= 0.0 {
            return Err(TraderError::invalid("increments", "step", "step must be positive"));
        }
        if start <= 0.0 {
            return Err(TraderError::invalid(
                "increments",
                "start",
                "start must be a positive multiplier",
            ));
        }
        if stop < start {
            return Err(TraderError::invalid(
                "increments",
                "stop",
                "stop must not be below start",
            ));
        }

        let count = ((stop - start) / step + TOLERANCE).floor() as usize + 1;
        let mut values: Vec<f64> = (0..count)
            .map(|i| ((start + step * i as f64) * ROUNDING).round() / ROUNDING)
            .collect();
        values.dedup();
        Ok(IncrementSet { values })
    }

    /// Build from explicit values; they are sorted and deduplicated.
    pub fn from_values(mut values: Vec<f64>) -> Result<Self, TraderError> {
        if values.is_empty() || values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(TraderError::invalid(
                "increments",
                "values",
                "increments must be positive finite numbers",
            ));
        }
        values.sort_by(f64::total_cmp);
        values.dedup();
        Ok(IncrementSet { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    /// Index of the highest increment that `magnitude` meets or exceeds.
    pub fn highest_satisfied(&self, magnitude: f64) -> Option<usize> {
        let count = self.values.partition_point(|&v| v <= magnitude + TOLERANCE);
        count.checked_sub(1)
    }

    /// Index of the first increment at or above `threshold`.
    pub fn first_at_least(&self, threshold: f64) -> usize {
        self.values.partition_point(|&v| v < threshold - TOLERANCE)
    }
}
