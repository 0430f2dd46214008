//! Weighted scoring of action candidates

use super::principle::{Principle, WeightTable};
use crate::types::{Action, ActionCandidate, ACTION_COUNT};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One principle's contribution to an [`AlignmentScore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipleScore {
    /// Principle scored
    pub principle: Principle,
    /// Raw score in [0, 1]
    pub raw: f64,
    /// Configured weight (>= 0)
    pub weight: f64,
}

impl PrincipleScore {
    /// Raw score times weight
    pub fn weighted(&self) -> f64 {
        self.raw * self.weight
    }
}

/// Normalized alignment of one candidate with the configured principles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentScore {
    /// Action the score was computed for
    pub action: Action,

    /// Weighted sum divided by the total weight
    pub value: f64,

    /// Per-principle breakdown, in summation order
    pub contributions: Vec<PrincipleScore>,

    /// Version of the weight table used
    pub weights_version: u32,

    /// Digest of the weight table that produced this score
    pub weights_digest: String,
}

/// Combines principle scores using a frozen [`WeightTable`]
#[derive(Debug, Clone)]
pub struct AlignmentScorer {
    table: WeightTable,
    top_k: usize,
}

impl AlignmentScorer {
    /// Scorer over `table`, scoring only the chosen action
    pub fn new(table: WeightTable) -> Self {
        Self { table, top_k: 1 }
    }

    /// Score the `k` most probable actions instead of only the nominated one
    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k.clamp(1, ACTION_COUNT);
        self
    }

    /// The weight table
    pub fn table(&self) -> &WeightTable {
        &self.table
    }

    /// How many top actions are ranked
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Score a single candidate
    ///
    /// Summation runs in table order so identical inputs give identical bits.
    pub fn score(&self, candidate: &ActionCandidate) -> AlignmentScore {
        let mut weighted_sum = 0.0;
        let mut contributions = Vec::with_capacity(self.table.entries().len());

        for &(principle, weight) in self.table.entries() {
            let contribution = PrincipleScore {
                principle,
                raw: principle.raw_score(candidate),
                weight,
            };
            weighted_sum += contribution.weighted();
            contributions.push(contribution);
        }

        AlignmentScore {
            action: candidate.action,
            value: weighted_sum / self.table.total_weight(),
            contributions,
            weights_version: self.table.version(),
            weights_digest: self.table.digest().to_string(),
        }
    }

    /// Score and sort candidates, best first
    ///
    /// Ties go to the cheaper action, then to the earlier one in [`Action::ALL`].
    pub fn rank(&self, candidates: &[ActionCandidate]) -> Vec<(ActionCandidate, AlignmentScore)> {
        let mut ranked: Vec<_> = candidates
            .iter()
            .map(|c| (c.clone(), self.score(c)))
            .collect();
        ranked.sort_by(|(a, sa), (b, sb)| compare(a.action, sa, b.action, sb));
        ranked
    }

    /// Pick the candidate that goes to safety review
    ///
    /// With `top_k == 1`, or for the fallback candidate, this is the input
    /// candidate. Otherwise the `top_k` most probable actions are ranked.
    pub fn select(&self, candidate: &ActionCandidate) -> (ActionCandidate, AlignmentScore) {
        if self.top_k <= 1 || candidate.fallback {
            return (candidate.clone(), self.score(candidate));
        }

        let mut by_probability = Action::ALL;
        by_probability.sort_by(|a, b| {
            candidate.probabilities[b.index()]
                .total_cmp(&candidate.probabilities[a.index()])
                .then(a.cmp(b))
        });
        let shortlist: Vec<_> = by_probability[..self.top_k]
            .iter()
            .map(|&action| candidate.with_action(action))
            .collect();

        let mut ranked = self.rank(&shortlist);
        if ranked.is_empty() {
            (candidate.clone(), self.score(candidate))
        } else {
            ranked.swap_remove(0)
        }
    }
}

fn compare(a: Action, sa: &AlignmentScore, b: Action, sb: &AlignmentScore) -> Ordering {
    sb.value
        .total_cmp(&sa.value)
        .then(a.energy_cost().total_cmp(&b.energy_cost()))
        .then(a.cmp(&b))
}
