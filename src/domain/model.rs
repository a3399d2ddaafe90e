//! Activated models and the viability aggregator that produces them.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use super::increment::IncrementSet;
use super::signature::{PatternSignature, ShapeKey};
use super::trier::TallyMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub usize);

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub id: ModelId,
    pub signature: PatternSignature,
    pub win_rate: f64,
    pub occurrence_count: u64,
    enabled: bool,
    live_wins: u32,
    live_losses: u32,
}

impl Model {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn live_wins(&self) -> u32 {
        self.live_wins
    }

    pub fn live_losses(&self) -> u32 {
        self.live_losses
    }

    pub fn live_trades(&self) -> u32 {
        self.live_wins + self.live_losses
    }

    pub fn live_win_rate(&self) -> Option<f64> {
        match self.live_trades() {
            0 => None,
            n => Some(self.live_wins as f64 / n as f64),
        }
    }

    /// Exact match of a live shape against this model's signature.
    pub fn matches(&self, shape: &ShapeKey) -> bool {
        self.signature.shape == *shape
    }
}

/// Thresholds a signature must meet to become a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivationCriteria {
    pub min_occurrences: u64,
    pub activation_threshold: f64,
}

/// Models in priority order, together with the increment vocabulary they were built on.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSet {
    increments: Arc<IncrementSet>,
    models: Vec<Model>,
}

impl ModelSet {
    pub fn increments(&self) -> &Arc<IncrementSet> {
        &self.increments
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn get(&self, id: ModelId) -> Option<&Model> {
        self.models.get(id.0)
    }

    /// Enabled models in priority order.
    pub fn enabled(&self) -> impl Iterator<Item = &Model> {
        self.models.iter().filter(|m| m.enabled)
    }

    /// First enabled model, in priority order, whose shape matches.
    pub fn first_match(&self, shape: &ShapeKey) -> Option<&Model> {
        self.enabled().find(|m| m.matches(shape))
    }

    /// Outcome multiplier for a model's target price.
    pub fn outcome_increment(&self, id: ModelId) -> Option<f64> {
        let model = self.get(id)?;
        self.increments.get(model.signature.outcome)
    }

    pub(crate) fn record_live_result(&mut self, id: ModelId, win: bool) -> Option<&Model> {
        let model = self.models.get_mut(id.0)?;
        if win {
            model.live_wins += 1;
        } else {
            model.live_losses += 1;
        }
        Some(model)
    }

    /// Disable a model for the rest of the run. There is no way back.
    pub(crate) fn deactivate(&mut self, id: ModelId) -> bool {
        match self.models.get_mut(id.0) {
            Some(model) if model.enabled => {
                model.enabled = false;
                true
            }
            _ => false,
        }
    }
}

/// Turn completed tallies into an ordered set of enabled models.
///
/// Signatures qualify with `occurrences >= min_occurrences` and
/// `win_rate >= activation_threshold`. Order: occurrences descending, win rate
/// descending, then the signature's lexical encoding.
pub fn aggregate(
    tallies: &TallyMap,
    increments: Arc<IncrementSet>,
    criteria: &ActivationCriteria,
) -> ModelSet {
    let mut qualified: Vec<(PatternSignature, u64, f64)> = tallies
        .iter()
        .filter(|(_, t)| t.occurrences >= criteria.min_occurrences)
        .filter_map(|(sig, t)| {
            let rate = t.win_rate()?;
            (rate >= criteria.activation_threshold).then_some((*sig, t.occurrences, rate))
        })
        .collect();

    qualified.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal))
            .then_with(|| a.0.encode().cmp(&b.0.encode()))
    });

    let models: Vec<Model> = qualified
        .into_iter()
        .enumerate()
        .map(|(rank, (signature, occurrence_count, win_rate))| Model {
            id: ModelId(rank),
            signature,
            win_rate,
            occurrence_count,
            enabled: true,
            live_wins: 0,
            live_losses: 0,
        })
        .collect();

    info!(
        candidates = tallies.len(),
        activated = models.len(),
        "aggregated models"
    );
    for model in &models {
        info!(
            model = %model.id,
            signature = %model.signature.describe(&increments),
            occurrences = model.occurrence_count,
            win_rate = model.win_rate,
            "model activated"
        );
    }

    ModelSet { increments, models }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signature::{Direction, Move};
    use crate::domain::trier::BacktestTally;

    fn increments() -> Arc<IncrementSet> {
        Arc::new(IncrementSet::from_values(vec![1.0, 1.01, 1.02]).unwrap())
    }

    fn shape(level: usize) -> ShapeKey {
        let m = |direction| Move {
            direction,
            level: Some(level),
        };
        ShapeKey {
            ab: m(Direction::Rising),
            bc: Move {
                direction: Direction::Falling,
                level: None,
            },
            cd: m(Direction::Rising),
        }
    }

    fn tally(occurrences: u64, wins: u64) -> BacktestTally {
        BacktestTally {
            occurrences,
            wins,
            losses: occurrences - wins,
        }
    }

    fn criteria() -> ActivationCriteria {
        ActivationCriteria {
            min_occurrences: 50,
            activation_threshold: 0.70,
        }
    }

    #[test]
    fn below_activation_threshold_is_dropped() {
        let mut tallies = TallyMap::new();
        tallies.insert(PatternSignature::new(shape(1), 2), tally(60, 41));
        let set = aggregate(&tallies, increments(), &criteria());
        assert!(set.is_empty());
    }

    #[test]
    fn above_activation_threshold_is_enabled() {
        let mut tallies = TallyMap::new();
        tallies.insert(PatternSignature::new(shape(1), 2), tally(60, 45));
        let set = aggregate(&tallies, increments(), &criteria());
        assert_eq!(set.len(), 1);
        let model = &set.models()[0];
        assert!(model.enabled());
        assert_eq!(model.occurrence_count, 60);
        assert!((model.win_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(model.live_trades(), 0);
    }

    #[test]
    fn too_few_occurrences_is_dropped() {
        let mut tallies = TallyMap::new();
        tallies.insert(PatternSignature::new(shape(1), 2), tally(49, 49));
        assert!(aggregate(&tallies, increments(), &criteria()).is_empty());
    }

    #[test]
    fn ordering_by_occurrences_then_rate_then_encoding() {
        let mut tallies = TallyMap::new();
        let small = PatternSignature::new(shape(0), 2);
        let big = PatternSignature::new(shape(1), 2);
        let tie_a = PatternSignature::new(shape(2), 1);
        let tie_b = PatternSignature::new(shape(2), 2);
        tallies.insert(small, tally(50, 45));
        tallies.insert(big, tally(100, 80));
        tallies.insert(tie_b, tally(80, 60));
        tallies.insert(tie_a, tally(80, 60));

        let set = aggregate(&tallies, increments(), &criteria());
        let order: Vec<PatternSignature> = set.models().iter().map(|m| m.signature).collect();
        assert_eq!(order, vec![big, tie_a, tie_b, small]);
        let ids: Vec<usize> = set.models().iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn higher_rate_wins_tie_on_occurrences() {
        let mut tallies = TallyMap::new();
        let low = PatternSignature::new(shape(0), 2);
        let high = PatternSignature::new(shape(1), 2);
        tallies.insert(low, tally(80, 60));
        tallies.insert(high, tally(80, 70));
        let set = aggregate(&tallies, increments(), &criteria());
        assert_eq!(set.models()[0].signature, high);
    }

    #[test]
    fn deactivation_is_permanent() {
        let mut tallies = TallyMap::new();
        tallies.insert(PatternSignature::new(shape(1), 2), tally(60, 45));
        let mut set = aggregate(&tallies, increments(), &criteria());
        assert!(set.deactivate(ModelId(0)));
        assert!(!set.deactivate(ModelId(0)));
        assert!(!set.models()[0].enabled());
        assert_eq!(set.enabled().count(), 0);
        assert!(set.first_match(&shape(1)).is_none());
    }

    #[test]
    fn first_match_respects_priority() {
        let mut tallies = TallyMap::new();
        tallies.insert(PatternSignature::new(shape(1), 1), tally(90, 70));
        tallies.insert(PatternSignature::new(shape(1), 2), tally(60, 45));
        let set = aggregate(&tallies, increments(), &criteria());
        let m = set.first_match(&shape(1)).unwrap();
        assert_eq!(m.signature.outcome, 1);
        assert_eq!(set.outcome_increment(m.id), Some(1.01));
        assert!(set.first_match(&shape(0)).is_none());
    }

    #[test]
    fn live_results_accumulate() {
        let mut tallies = TallyMap::new();
        tallies.insert(PatternSignature::new(shape(1), 2), tally(60, 45));
        let mut set = aggregate(&tallies, increments(), &criteria());
        set.record_live_result(ModelId(0), true);
        set.record_live_result(ModelId(0), false);
        let m = set.record_live_result(ModelId(0), true).unwrap();
        assert_eq!(m.live_wins(), 2);
        assert_eq!(m.live_losses(), 1);
        assert!((m.live_win_rate().unwrap() - 2.0 / 3.0).abs() < f64::EPSILON);
        assert!(set.record_live_result(ModelId(9), true).is_none());
    }
}
