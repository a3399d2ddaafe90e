//! Discretized pattern signatures.
//!
//! Levels are indices into the [`IncrementSet`] that produced them, so a
//! signature only means something next to that exact vocabulary.

use std::fmt;

use super::increment::IncrementSet;
use super::structure::Pivots;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Falling,
    Rising,
}

/// One discretized relation between consecutive pivots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Move {
    pub direction: Direction,
    /// Highest increment the move's magnitude meets; `None` below the vocabulary.
    pub level: Option<usize>,
}

impl Move {
    /// Classify `ratio = next / prev` against the vocabulary as is.
    ///
    /// A falling ratio sits below 1, so with a vocabulary starting at or above 1
    /// it carries a direction but no level.
    pub fn classify(ratio: f64, increments: &IncrementSet) -> Self {
        let direction = if ratio >= 1.0 {
            Direction::Rising
        } else {
            Direction::Falling
        };
        Move {
            direction,
            level: increments.highest_satisfied(ratio),
        }
    }

    fn encode(&self) -> String {
        let dir = match self.direction {
            Direction::Rising => 'R',
            Direction::Falling => 'F',
        };
        match self.level {
            Some(level) => format!("{dir}{level:03}"),
            None => format!("{dir}---"),
        }
    }

    fn describe(&self, increments: &IncrementSet) -> String {
        let dir = match self.direction {
            Direction::Rising => "rising",
            Direction::Falling => "falling",
        };
        match self.level.and_then(|l| increments.get(l)) {
            Some(v) => format!("{dir} {v}"),
            None => dir.to_string(),
        }
    }
}

/// The three discretized relations A→B, B→C, C→D.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeKey {
    pub ab: Move,
    pub bc: Move,
    pub cd: Move,
}

impl ShapeKey {
    pub fn from_pivots(pivots: &Pivots, increments: &IncrementSet) -> Self {
        let (ab, bc, cd) = pivots.ratios();
        ShapeKey {
            ab: Move::classify(ab, increments),
            bc: Move::classify(bc, increments),
            cd: Move::classify(cd, increments),
        }
    }
}

/// Shape plus the outcome increment the move D→E was tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternSignature {
    pub shape: ShapeKey,
    pub outcome: usize,
}

impl PatternSignature {
    pub fn new(shape: ShapeKey, outcome: usize) -> Self {
        PatternSignature { shape, outcome }
    }

    /// Stable lexical encoding, used as the final ordering tie-break.
    pub fn encode(&self) -> String {
        format!(
            "{}-{}-{}>{:03}",
            self.shape.ab.encode(),
            self.shape.bc.encode(),
            self.shape.cd.encode(),
            self.outcome
        )
    }

    /// Human-readable form with increment values substituted.
    pub fn describe(&self, increments: &IncrementSet) -> String {
        let outcome = increments
            .get(self.outcome)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "?".to_string());
        format!(
            "{{{}, {}, {}}} -> {outcome}",
            self.shape.ab.describe(increments),
            self.shape.bc.describe(increments),
            self.shape.cd.describe(increments),
        )
    }
}

impl fmt::Display for PatternSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::structure::{Role, StructuralPoint};

    fn increments() -> IncrementSet {
        IncrementSet::from_values(vec![1.0, 1.01, 1.02]).unwrap()
    }

    fn pivots(a: f64, b: f64, c: f64, d: f64) -> Pivots {
        let p = |role, i, price| StructuralPoint {
            role,
            index_in_series: i,
            price,
        };
        Pivots {
            a: p(Role::A, 0, a),
            b: p(Role::B, 1, b),
            c: p(Role::C, 2, c),
            d: p(Role::D, 3, d),
        }
    }

    #[test]
    fn rising_move_takes_coarsest_level() {
        let m = Move::classify(1.0404, &increments());
        assert_eq!(m.direction, Direction::Rising);
        assert_eq!(m.level, Some(2));
    }

    #[test]
    fn falling_move_meets_no_increment_at_or_above_one() {
        let m = Move::classify(99.0 / 102.0, &increments());
        assert_eq!(m, Move { direction: Direction::Falling, level: None });
    }

    #[test]
    fn falling_move_keeps_level_under_a_vocabulary_below_one() {
        let set = IncrementSet::from_values(vec![0.95, 0.97, 1.0]).unwrap();
        let m = Move::classify(99.0 / 102.0, &set);
        assert_eq!(m, Move { direction: Direction::Falling, level: Some(1) });
    }

    #[test]
    fn unchanged_price_is_rising_at_base_level() {
        let m = Move::classify(1.0, &increments());
        assert_eq!(m.direction, Direction::Rising);
        assert_eq!(m.level, Some(0));
    }

    #[test]
    fn small_move_below_vocabulary_has_no_level() {
        let set = IncrementSet::from_values(vec![1.01, 1.02]).unwrap();
        let m = Move::classify(1.005, &set);
        assert_eq!(m.level, None);
    }

    #[test]
    fn shape_from_documented_example() {
        let shape = ShapeKey::from_pivots(&pivots(100.0, 102.0, 99.0, 103.0), &increments());
        assert_eq!(shape.ab, Move { direction: Direction::Rising, level: Some(2) });
        assert_eq!(shape.bc, Move { direction: Direction::Falling, level: None });
        assert_eq!(shape.cd, Move { direction: Direction::Rising, level: Some(2) });
    }

    #[test]
    fn encoding_is_stable() {
        let shape = ShapeKey::from_pivots(&pivots(100.0, 102.0, 99.0, 103.0), &increments());
        let sig = PatternSignature::new(shape, 2);
        assert_eq!(sig.encode(), "R002-F----R002>002");
        assert_eq!(sig.to_string(), sig.encode());
        assert_eq!(
            sig.describe(&increments()),
            "{rising 1.02, falling, rising 1.02} -> 1.02"
        );
    }

    #[test]
    fn encoding_marks_missing_levels() {
        let set = IncrementSet::from_values(vec![1.01, 1.02]).unwrap();
        let shape = ShapeKey::from_pivots(&pivots(100.0, 100.5, 100.0, 102.0), &set);
        assert_eq!(PatternSignature::new(shape, 1).encode(), "R----F----R001>001");
    }
}
