//! Cartesian pattern trier: classifies every historical structure against every
//! candidate outcome increment and tallies the results per signature.
//!
//! D indices are split into contiguous partitions that are tallied on a rayon
//! pool; partial tallies merge by per-signature summation, so the result does not
//! depend on how the work was split.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, info};

use super::error::TraderError;
use super::increment::IncrementSet;
use super::price::PricePoint;
use super::signature::{PatternSignature, ShapeKey};
use super::structure::{Structure, StructureExtractor};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BacktestTally {
    pub occurrences: u64,
    pub wins: u64,
    pub losses: u64,
}

impl BacktestTally {
    pub fn record(&mut self, win: bool) {
        self.occurrences += 1;
        if win {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
    }

    pub fn merge(&mut self, other: &BacktestTally) {
        self.occurrences += other.occurrences;
        self.wins += other.wins;
        self.losses += other.losses;
    }

    /// `wins / (wins + losses)`; `None` before the first occurrence.
    pub fn win_rate(&self) -> Option<f64> {
        if self.occurrences == 0 {
            return None;
        }
        Some(self.wins as f64 / (self.wins + self.losses) as f64)
    }
}

/// Tallies keyed by signature, in signature order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TallyMap {
    tallies: BTreeMap<PatternSignature, BacktestTally>,
    structures: u64,
}

impl TallyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, signature: &PatternSignature) -> Option<&BacktestTally> {
        self.tallies.get(signature)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PatternSignature, &BacktestTally)> {
        self.tallies.iter()
    }

    pub fn len(&self) -> usize {
        self.tallies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tallies.is_empty()
    }

    /// Number of structures that contributed to the map.
    pub fn structures(&self) -> u64 {
        self.structures
    }

    pub fn record(&mut self, signature: PatternSignature, win: bool) {
        self.tallies.entry(signature).or_default().record(win);
    }

    /// Set the tally for `signature`, replacing any previous one.
    pub fn insert(&mut self, signature: PatternSignature, tally: BacktestTally) {
        self.tallies.insert(signature, tally);
    }

    pub fn merge(mut self, other: TallyMap) -> TallyMap {
        for (signature, tally) in other.tallies {
            self.tallies.entry(signature).or_default().merge(&tally);
        }
        self.structures += other.structures;
        self
    }
}

/// Parameters of one trier run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrierConfig {
    pub window_size: usize,
    pub outcome_horizon: usize,
    /// Lowest outcome increment tried.
    pub profit_threshold: f64,
    /// Worker threads; 0 uses rayon's default.
    pub workers: usize,
}

/// Tally one structure: its shape is discretized once, then every candidate
/// outcome increment from `outcome_floor` upward is classified as a win when
/// `E/D` reaches it.
pub fn try_structure(
    structure: &Structure,
    increments: &IncrementSet,
    outcome_floor: usize,
    tallies: &mut TallyMap,
) {
    let shape = ShapeKey::from_pivots(&structure.pivots, increments);
    let outcome_ratio = structure.outcome_ratio();
    let reached = increments.highest_satisfied(outcome_ratio);
    for outcome in outcome_floor..increments.len() {
        let win = reached.is_some_and(|level| level >= outcome);
        tallies.record(PatternSignature::new(shape, outcome), win);
    }
    tallies.structures += 1;
}

/// Tally every structure whose D index lies in `range`.
pub fn try_range(
    extractor: &StructureExtractor<'_>,
    range: std::ops::Range<usize>,
    increments: &IncrementSet,
    outcome_floor: usize,
) -> TallyMap {
    let mut tallies = TallyMap::new();
    for d_index in range {
        if let Some(structure) = extractor.structure_at(d_index) {
            try_structure(&structure, increments, outcome_floor, &mut tallies);
        }
    }
    tallies
}

/// Run the trier over a full price history.
pub fn run_trier(
    prices: &[PricePoint],
    increments: &IncrementSet,
    config: &TrierConfig,
) -> Result<TallyMap, TraderError> {
    let extractor =
        StructureExtractor::new(prices, config.window_size, config.outcome_horizon)?;
    let outcome_floor = increments.first_at_least(config.profit_threshold);
    if outcome_floor >= increments.len() {
        return Err(TraderError::invalid(
            "backtest",
            "profit_threshold",
            "profit_threshold is above every increment",
        ));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .map_err(|e| TraderError::invalid("backtest", "workers", e.to_string()))?;

    let range = extractor.d_range();
    let threads = pool.current_num_threads().max(1);
    let chunk = range.len().div_ceil(threads * 4).max(1);
    let partitions: Vec<std::ops::Range<usize>> = range
        .clone()
        .step_by(chunk)
        .map(|start| start..(start + chunk).min(range.end))
        .collect();
    debug!(partitions = partitions.len(), threads, "tallying structures");

    let tallies = pool.install(|| {
        partitions
            .into_par_iter()
            .map(|part| try_range(&extractor, part, increments, outcome_floor))
            .reduce(TallyMap::new, TallyMap::merge)
    });

    info!(
        structures = tallies.structures(),
        signatures = tallies.len(),
        "backtest tallies complete"
    );
    Ok(tallies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signature::{Direction, Move};
    use chrono::{TimeZone, Utc};

    fn points(prices: &[f64]) -> Vec<PricePoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                PricePoint::new(Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap(), p)
            })
            .collect()
    }

    fn increments() -> IncrementSet {
        IncrementSet::from_values(vec![1.0, 1.01, 1.02]).unwrap()
    }

    fn config(workers: usize) -> TrierConfig {
        TrierConfig {
            window_size: 4,
            outcome_horizon: 1,
            profit_threshold: 1.02,
            workers,
        }
    }

    #[test]
    fn tally_win_rate() {
        let mut t = BacktestTally::default();
        assert_eq!(t.win_rate(), None);
        t.record(true);
        t.record(false);
        t.record(true);
        t.record(true);
        assert_eq!(t.occurrences, 4);
        assert!((t.win_rate().unwrap() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn documented_example_is_a_win() {
        let prices = points(&[100.0, 102.0, 99.0, 103.0, 107.0]);
        let tallies = run_trier(&prices, &increments(), &config(1)).unwrap();

        assert_eq!(tallies.structures(), 1);
        assert_eq!(tallies.len(), 1);
        let (sig, tally) = tallies.iter().next().unwrap();
        assert_eq!(sig.shape.ab, Move { direction: Direction::Rising, level: Some(2) });
        assert_eq!(sig.shape.bc, Move { direction: Direction::Falling, level: None });
        assert_eq!(sig.shape.cd, Move { direction: Direction::Rising, level: Some(2) });
        assert_eq!(sig.outcome, 2);
        assert_eq!(*tally, BacktestTally { occurrences: 1, wins: 1, losses: 0 });
    }

    #[test]
    fn outcome_below_threshold_is_a_loss() {
        let prices = points(&[100.0, 102.0, 99.0, 103.0, 104.0]);
        let tallies = run_trier(&prices, &increments(), &config(1)).unwrap();
        let (_, tally) = tallies.iter().next().unwrap();
        assert_eq!(tally.losses, 1);
        assert_eq!(tally.wins, 0);
    }

    #[test]
    fn every_outcome_from_floor_is_tried() {
        let prices = points(&[100.0, 102.0, 99.0, 103.0, 104.5]);
        let cfg = TrierConfig {
            profit_threshold: 1.0,
            ..config(1)
        };
        let tallies = run_trier(&prices, &increments(), &cfg).unwrap();
        // 104.5 / 103 = 1.0146: wins at 1.00 and 1.01, loses at 1.02
        let outcomes: Vec<(usize, u64)> = tallies.iter().map(|(s, t)| (s.outcome, t.wins)).collect();
        assert_eq!(outcomes, vec![(0, 1), (1, 1), (2, 0)]);
    }

    #[test]
    fn threshold_above_vocabulary_is_rejected() {
        let prices = points(&[100.0, 102.0, 99.0, 103.0, 107.0]);
        let cfg = TrierConfig {
            profit_threshold: 1.5,
            ..config(1)
        };
        assert!(run_trier(&prices, &increments(), &cfg).is_err());
    }

    #[test]
    fn merge_sums_per_signature() {
        let prices = points(&[100.0, 102.0, 99.0, 103.0, 107.0, 101.0, 104.0, 100.0]);
        let inc = increments();
        let ex = StructureExtractor::new(&prices, 4, 1).unwrap();
        let whole = try_range(&ex, ex.d_range(), &inc, 2);
        let left = try_range(&ex, 3..5, &inc, 2);
        let right = try_range(&ex, 5..ex.d_range().end, &inc, 2);
        assert_eq!(left.merge(right), whole);
    }

    #[test]
    fn worker_count_does_not_change_result() {
        let raw: Vec<f64> = (0..400)
            .map(|i| 100.0 + ((i * 37) % 23) as f64 * 0.7 - ((i * 11) % 7) as f64)
            .collect();
        let prices = points(&raw);
        let inc = IncrementSet::generate(1.0, 1.1, 0.01).unwrap();
        let cfg = TrierConfig {
            window_size: 6,
            outcome_horizon: 3,
            profit_threshold: 1.01,
            workers: 1,
        };
        let single = run_trier(&prices, &inc, &cfg).unwrap();
        let multi = run_trier(&prices, &inc, &TrierConfig { workers: 4, ..cfg }).unwrap();
        assert_eq!(single, multi);
        assert!(single.structures() > 0);
    }
}
