//! Structural point extraction (A, B, C, D pivots plus the outcome point E).
//!
//! The pivot rule lives in [`extract_pivots`] and is the only place pivots are
//! chosen: the batch extractor and the live engine both call it on a window of
//! `w` points whose last point is D.

use super::error::TraderError;
use super::price::PricePoint;

/// Smallest window that can hold A, B, C and D.
pub const MIN_WINDOW: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    A,
    B,
    C,
    D,
    E,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructuralPoint {
    pub role: Role,
    pub index_in_series: usize,
    pub price: f64,
}

/// The four pivots known at D's tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pivots {
    pub a: StructuralPoint,
    pub b: StructuralPoint,
    pub c: StructuralPoint,
    pub d: StructuralPoint,
}

impl Pivots {
    /// `(B/A, C/B, D/C)`
    pub fn ratios(&self) -> (f64, f64, f64) {
        (
            self.b.price / self.a.price,
            self.c.price / self.b.price,
            self.d.price / self.c.price,
        )
    }
}

/// Pivots plus the outcome point `outcome_horizon` ticks after D.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Structure {
    pub pivots: Pivots,
    pub e: StructuralPoint,
}

impl Structure {
    /// `E/D`
    pub fn outcome_ratio(&self) -> f64 {
        self.e.price / self.pivots.d.price
    }
}

/// Select pivots from `window`, whose first point sits at `offset` in the series.
///
/// Equal consecutive prices collapse into one run. The window's first run is an
/// anchor pivot; any later run whose neighbours are both lower or both higher is a
/// turning point. A, B and C are the three most recent pivots before the run that
/// holds D, and D is the window's last point.
pub fn extract_pivots(window: &[PricePoint], offset: usize) -> Option<Pivots> {
    if window.len() < MIN_WINDOW {
        return None;
    }

    // (index within window of the run's first point, price)
    let mut runs: Vec<(usize, f64)> = Vec::with_capacity(window.len());
    for (i, point) in window.iter().enumerate() {
        match runs.last() {
            Some(&(_, price)) if price == point.price => {}
            _ => runs.push((i, point.price)),
        }
    }
    if runs.len() < 2 {
        return None;
    }

    let last_run = runs.len() - 1;
    let mut pivots: Vec<(usize, f64)> = vec![runs[0]];
    for k in 1..last_run {
        let before = runs[k].1 - runs[k - 1].1;
        let after = runs[k + 1].1 - runs[k].1;
        if before.signum() != after.signum() {
            pivots.push(runs[k]);
        }
    }
    if pivots.len() < 3 {
        return None;
    }

    let n = pivots.len();
    let point = |role: Role, (i, price): (usize, f64)| StructuralPoint {
        role,
        index_in_series: offset + i,
        price,
    };
    let d_index = window.len() - 1;
    Some(Pivots {
        a: point(Role::A, pivots[n - 3]),
        b: point(Role::B, pivots[n - 2]),
        c: point(Role::C, pivots[n - 1]),
        d: point(Role::D, (d_index, window[d_index].price)),
    })
}

/// Batch extraction over a full price history.
#[derive(Debug, Clone, Copy)]
pub struct StructureExtractor<'a> {
    prices: &'a [PricePoint],
    window: usize,
    horizon: usize,
}

impl<'a> StructureExtractor<'a> {
    pub fn new(prices: &'a [PricePoint], window: usize, horizon: usize) -> Result<Self, TraderError> {
        if window < MIN_WINDOW {
            return Err(TraderError::invalid(
                "backtest",
                "window_size",
                format!("window_size must be at least {MIN_WINDOW}"),
            ));
        }
        if horizon == 0 {
            return Err(TraderError::invalid(
                "backtest",
                "outcome_horizon",
                "outcome_horizon must be at least 1",
            ));
        }
        Ok(StructureExtractor {
            prices,
            window,
            horizon,
        })
    }

    /// Range of D indices for which a window and an outcome point both exist.
    pub fn d_range(&self) -> std::ops::Range<usize> {
        let start = self.window - 1;
        let end = self.prices.len().saturating_sub(self.horizon).max(start);
        start..end
    }

    /// The structure whose D sits at `d_index`, if the window forms one.
    pub fn structure_at(&self, d_index: usize) -> Option<Structure> {
        if d_index + 1 < self.window || d_index + self.horizon >= self.prices.len() {
            return None;
        }
        let offset = d_index + 1 - self.window;
        let pivots = extract_pivots(&self.prices[offset..=d_index], offset)?;
        let e_index = d_index + self.horizon;
        Some(Structure {
            pivots,
            e: StructuralPoint {
                role: Role::E,
                index_in_series: e_index,
                price: self.prices[e_index].price,
            },
        })
    }

    /// A fresh pass over every structure; call again to restart.
    pub fn iter(&self) -> Structures<'a> {
        Structures {
            extractor: *self,
            range: self.d_range(),
        }
    }
}

impl<'a> IntoIterator for &StructureExtractor<'a> {
    type Item = Structure;
    type IntoIter = Structures<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct Structures<'a> {
    extractor: StructureExtractor<'a>,
    range: std::ops::Range<usize>,
}

impl Iterator for Structures<'_> {
    type Item = Structure;

    fn next(&mut self) -> Option<Structure> {
        for d_index in self.range.by_ref() {
            if let Some(s) = self.extractor.structure_at(d_index) {
                return Some(s);
            }
        }
        None
    }
}
