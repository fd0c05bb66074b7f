//! Four-tier banded threshold tables with linear interpolation between edges.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::core::errors::{LgError, Result};

/// Tier names, best first.
pub const TIERS: [&str; 4] = ["excellent", "good", "acceptable", "poor"];

/// Which way a statistic improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    LowerIsBetter,
    HigherIsBetter,
}

/// Maps a statistic onto a sub-score in [0, 100].
///
/// `edges[i]` is the boundary value of tier `i` and `scores[i]` the sub-score
/// awarded exactly at that edge. Values at or beyond the excellent edge get
/// `scores[0]`, values beyond the poor edge get `scores[3]`, and anything in
/// between is interpolated linearly between the two surrounding edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandTable {
    pub direction: Direction,
    pub edges: [f64; 4],
    #[serde(default = "BandTable::default_scores")]
    pub scores: [f64; 4],
}

impl BandTable {
    #[must_use]
    pub const fn default_scores() -> [f64; 4] {
        [100.0, 80.0, 60.0, 30.0]
    }

    #[must_use]
    pub const fn lower_is_better(edges: [f64; 4]) -> Self {
        Self {
            direction: Direction::LowerIsBetter,
            edges,
            scores: Self::default_scores(),
        }
    }

    #[must_use]
    pub const fn higher_is_better(edges: [f64; 4]) -> Self {
        Self {
            direction: Direction::HigherIsBetter,
            edges,
            scores: Self::default_scores(),
        }
    }

    /// Sub-score for `value`. Non-finite values score as poor.
    #[must_use]
    pub fn score(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.scores[3];
        }
        // Flip higher-is-better tables so edges always ascend with badness.
        let sign = match self.direction {
            Direction::LowerIsBetter => 1.0,
            Direction::HigherIsBetter => -1.0,
        };
        let x = sign * value;
        let edge = |i: usize| sign * self.edges[i];

        if x <= edge(0) {
            return self.scores[0];
        }
        for i in 1..4 {
            let (lo, hi) = (edge(i - 1), edge(i));
            if x <= hi {
                let t = (x - lo) / (hi - lo);
                return self.scores[i - 1] + t * (self.scores[i] - self.scores[i - 1]);
            }
        }
        self.scores[3]
    }

    /// Name of the tier `value` falls in.
    #[must_use]
    pub fn tier(&self, value: f64) -> &'static str {
        let better_or_equal = |edge: f64| match self.direction {
            Direction::LowerIsBetter => value <= edge,
            Direction::HigherIsBetter => value >= edge,
        };
        self.edges
            .iter()
            .position(|&edge| better_or_equal(edge))
            .map_or(TIERS[3], |i| TIERS[i])
    }

    /// Edges must be finite, non-negative and strictly ordered by badness;
    /// scores must lie in [0, 100] and strictly descend.
    pub fn validate(&self, field: &str) -> Result<()> {
        if self.edges.iter().any(|e| !e.is_finite() || *e < 0.0) {
            return Err(LgError::invalid(
                format!("{field}.edges"),
                format!("edges must be finite and non-negative, got {:?}", self.edges),
            ));
        }
        let ordered = self.edges.windows(2).all(|w| match self.direction {
            Direction::LowerIsBetter => w[0] < w[1],
            Direction::HigherIsBetter => w[0] > w[1],
        });
        if !ordered {
            let want = match self.direction {
                Direction::LowerIsBetter => "strictly ascend",
                Direction::HigherIsBetter => "strictly descend",
            };
            return Err(LgError::invalid(
                format!("{field}.edges"),
                format!("edges must {want} from excellent to poor, got {:?}", self.edges),
            ));
        }
        if self
            .scores
            .iter()
            .any(|s| !s.is_finite() || !(0.0..=100.0).contains(s))
        {
            return Err(LgError::invalid(
                format!("{field}.scores"),
                format!("scores must be in [0, 100], got {:?}", self.scores),
            ));
        }
        if !self.scores.windows(2).all(|w| w[0] > w[1]) {
            return Err(LgError::invalid(
                format!("{field}.scores"),
                format!("scores must strictly descend, got {:?}", self.scores),
            ));
        }
        Ok(())
    }
}
