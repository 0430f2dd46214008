//! Principles and the versioned weight table
//!
//! Each principle turns a candidate into a raw score in [0, 1]. The weight
//! table fixes which principles count, how much, and in which order they are
//! summed.

use crate::error::ConfigError;
use crate::types::{Action, ActionCandidate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A scoring principle
///
/// Declaration order is the summation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Principle {
    /// Keep clear of the ground and obstacles
    Safety,
    /// Spend as little battery as the situation allows
    Energy,
    /// Avoid aggressive maneuvers when the airframe is unsteady
    Smoothness,
    /// Make headway
    Progress,
    /// Trust confident policy choices
    Confidence,
}

impl Principle {
    /// Every principle, in summation order
    pub const ALL: [Principle; 5] = [
        Principle::Safety,
        Principle::Energy,
        Principle::Smoothness,
        Principle::Progress,
        Principle::Confidence,
    ];

    /// Configuration key of this principle
    pub fn name(self) -> &'static str {
        match self {
            Principle::Safety => "safety",
            Principle::Energy => "energy",
            Principle::Smoothness => "smoothness",
            Principle::Progress => "progress",
            Principle::Confidence => "confidence",
        }
    }

    /// Raw score of `candidate` under this principle, clamped to [0, 1]
    pub fn raw_score(self, candidate: &ActionCandidate) -> f64 {
        let f = &candidate.features;
        let action = candidate.action;
        let raw = match self {
            Principle::Safety => match action {
                Action::Hover => 0.5 + 0.5 * f.stability(),
                Action::Climb => 0.5 + 0.5 * (1.0 - f.altitude_ratio()),
                Action::TurnLeft | Action::TurnRight => {
                    0.5 * f.stability() + 0.5 * f.proximity()
                }
                Action::Forward => f.proximity() * f.stability(),
            },
            // Low battery makes expensive actions proportionally worse.
            Principle::Energy => 1.0 - action.energy_cost() * (1.5 - 0.5 * f.energy()) / 1.5,
            Principle::Smoothness => {
                1.0 - action.maneuver_intensity() * (1.0 - 0.5 * f.stability())
            }
            Principle::Progress => match action {
                Action::Forward => 1.0,
                Action::TurnLeft | Action::TurnRight => 0.6,
                Action::Climb => 0.4,
                Action::Hover => 0.1,
            },
            Principle::Confidence => candidate.confidence(),
        };
        if raw.is_nan() {
            0.0
        } else {
            raw.clamp(0.0, 1.0)
        }
    }
}

impl fmt::Display for Principle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Principle {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Principle::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| ConfigError::UnknownPrinciple(s.to_string()))
    }
}

/// Resolved, versioned principle weights
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    version: u32,
    entries: Vec<(Principle, f64)>,
    total_weight: f64,
    digest: String,
}

impl WeightTable {
    /// Validate a name -> weight mapping and freeze it
    pub fn from_weights(
        version: u32,
        weights: &BTreeMap<String, f64>,
    ) -> Result<Self, ConfigError> {
        if weights.is_empty() {
            return Err(ConfigError::EmptyPrinciples);
        }

        let mut entries = Vec::with_capacity(weights.len());
        for (name, &weight) in weights {
            let principle: Principle = name.parse()?;
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    principle: name.clone(),
                    weight,
                });
            }
            entries.push((principle, weight));
        }
        entries.sort_by_key(|(p, _)| *p);

        let total_weight: f64 = entries.iter().map(|(_, w)| w).sum();
        if !total_weight.is_finite() {
            return Err(ConfigError::NonFiniteTotalWeight(total_weight));
        }
        if total_weight <= 0.0 {
            return Err(ConfigError::ZeroTotalWeight);
        }

        let mut hasher = blake3::Hasher::new();
        hasher.update(&version.to_le_bytes());
        for (principle, weight) in &entries {
            hasher.update(principle.name().as_bytes());
            hasher.update(&weight.to_bits().to_le_bytes());
        }
        let digest = hex::encode(&hasher.finalize().as_bytes()[..8]);

        Ok(Self {
            version,
            entries,
            total_weight,
            digest,
        })
    }

    /// Version tag from the configuration
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Short blake3 fingerprint of version + weights
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Sum of all weights; always positive and finite
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// `(principle, weight)` in summation order
    pub fn entries(&self) -> &[(Principle, f64)] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeatureVector;

    fn weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_table_sorted_in_principle_order() {
        let table =
            WeightTable::from_weights(1, &weights(&[("progress", 1.0), ("energy", 2.0)])).unwrap();
        let order: Vec<_> = table.entries().iter().map(|(p, _)| *p).collect();
        assert_eq!(order, vec![Principle::Energy, Principle::Progress]);
        assert_eq!(table.total_weight(), 3.0);
    }

    #[test]
    fn test_table_rejections() {
        assert_eq!(
            WeightTable::from_weights(1, &BTreeMap::new()),
            Err(ConfigError::EmptyPrinciples)
        );
        assert_eq!(
            WeightTable::from_weights(1, &weights(&[("karma", 1.0)])),
            Err(ConfigError::UnknownPrinciple("karma".into()))
        );
        assert_eq!(
            WeightTable::from_weights(1, &weights(&[("safety", 0.0)])),
            Err(ConfigError::ZeroTotalWeight)
        );
        assert!(WeightTable::from_weights(1, &weights(&[("safety", f64::INFINITY)])).is_err());
        // Each weight is finite, the sum is not.
        assert_eq!(
            WeightTable::from_weights(1, &weights(&[("safety", f64::MAX), ("energy", f64::MAX)])),
            Err(ConfigError::NonFiniteTotalWeight(f64::INFINITY))
        );
    }

    #[test]
    fn test_digest_tracks_version_and_weights() {
        let a = WeightTable::from_weights(1, &weights(&[("safety", 1.0)])).unwrap();
        let b = WeightTable::from_weights(2, &weights(&[("safety", 1.0)])).unwrap();
        let c = WeightTable::from_weights(1, &weights(&[("safety", 0.9)])).unwrap();
        let a2 = WeightTable::from_weights(1, &weights(&[("safety", 1.0)])).unwrap();

        assert_eq!(a.digest(), a2.digest());
        assert_ne!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 16);
    }

    #[test]
    fn test_raw_scores_stay_in_unit_interval() {
        let features = FeatureVector::new([0.0, 0.0, 0.0, 0.0, 0.0]);
        for action in Action::ALL {
            let candidate = ActionCandidate::fallback(features).with_action(action);
            for principle in Principle::ALL {
                let raw = principle.raw_score(&candidate);
                assert!((0.0..=1.0).contains(&raw), "{principle} {action} -> {raw}");
            }
        }
    }

    #[test]
    fn test_safety_prefers_climb_when_low() {
        let features = FeatureVector::new([0.8, 0.9, 0.5, 0.05, 0.5]);
        let base = ActionCandidate::fallback(features);
        let climb = Principle::Safety.raw_score(&base.with_action(Action::Climb));
        let forward = Principle::Safety.raw_score(&base.with_action(Action::Forward));
        assert!(climb > forward);
    }
}
