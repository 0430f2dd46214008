//! Veto rules and the versioned rule table

use crate::config::unit_interval;
use crate::error::ConfigError;
use crate::types::{Action, ActionCandidate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version of the built-in rule semantics
pub const RULE_TABLE_VERSION: u32 = 1;

/// A hard safety rule
///
/// Rules are pure predicates over the candidate, its features and the review
/// context. A matching rule vetoes the candidate regardless of its score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoRule {
    /// Too close to a configured no-fly zone
    NoFlyZone,
    /// Too low
    AltitudeFloor,
    /// Obstacle too close
    ObstacleProximity,
    /// Battery too low to keep moving
    LowEnergy,
    /// Attitude too unstable to keep moving
    Instability,
    /// Climbing near the altitude limit
    Ceiling,
}

impl VetoRule {
    /// Default evaluation order
    pub const DEFAULT_ORDER: [VetoRule; 6] = [
        VetoRule::NoFlyZone,
        VetoRule::AltitudeFloor,
        VetoRule::ObstacleProximity,
        VetoRule::LowEnergy,
        VetoRule::Instability,
        VetoRule::Ceiling,
    ];

    /// Stable identifier used in configuration
    pub fn id(self) -> &'static str {
        match self {
            VetoRule::NoFlyZone => "no_fly_zone",
            VetoRule::AltitudeFloor => "altitude_floor",
            VetoRule::ObstacleProximity => "obstacle_proximity",
            VetoRule::LowEnergy => "low_energy",
            VetoRule::Instability => "instability",
            VetoRule::Ceiling => "ceiling",
        }
    }

    /// One-line description for listings
    pub fn description(self) -> &'static str {
        match self {
            VetoRule::NoFlyZone => "a no-fly zone is closer than no_fly_margin",
            VetoRule::AltitudeFloor => "altitude ratio below min_altitude_ratio",
            VetoRule::ObstacleProximity => "obstacle proximity below min_proximity",
            VetoRule::LowEnergy => "energy below min_energy and the action is not hover",
            VetoRule::Instability => "stability below min_stability and the action is not hover",
            VetoRule::Ceiling => "climbing above max_altitude_ratio",
        }
    }

    /// Whether this rule vetoes `candidate`
    pub fn matches(
        self,
        candidate: &ActionCandidate,
        context: &ReviewContext,
        thresholds: &SafetyThresholds,
    ) -> bool {
        let f = &candidate.features;
        let moving = candidate.action != Action::Hover;
        match self {
            VetoRule::NoFlyZone => context
                .no_fly_zone_distance
                .is_some_and(|d| d < thresholds.no_fly_margin),
            VetoRule::AltitudeFloor => f.altitude_ratio() < thresholds.min_altitude_ratio,
            VetoRule::ObstacleProximity => f.proximity() < thresholds.min_proximity,
            VetoRule::LowEnergy => moving && f.energy() < thresholds.min_energy,
            VetoRule::Instability => moving && f.stability() < thresholds.min_stability,
            VetoRule::Ceiling => {
                candidate.action == Action::Climb
                    && f.altitude_ratio() > thresholds.max_altitude_ratio
            }
        }
    }
}

impl fmt::Display for VetoRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for VetoRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VetoRule::DEFAULT_ORDER
            .iter()
            .copied()
            .find(|r| r.id() == s)
            .ok_or_else(|| ConfigError::UnknownVetoRule(s.to_string()))
    }
}

/// Per-sample facts the rules need besides the candidate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewContext {
    /// Sequence number of the sample under review
    pub sequence: u64,

    /// Normalized distance to the nearest no-fly zone, if one is known
    pub no_fly_zone_distance: Option<f64>,
}

impl ReviewContext {
    /// Context with no geofence information
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            no_fly_zone_distance: None,
        }
    }

    /// Attach a normalized no-fly zone distance
    pub fn with_no_fly_zone(mut self, distance: f64) -> Self {
        self.no_fly_zone_distance = Some(distance);
        self
    }
}

/// Limits referenced by the rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyThresholds {
    /// Lowest allowed altitude ratio
    pub min_altitude_ratio: f64,
    /// Lowest allowed obstacle proximity
    pub min_proximity: f64,
    /// Lowest energy for a moving action
    pub min_energy: f64,
    /// Lowest stability for a moving action
    pub min_stability: f64,
    /// Highest altitude ratio at which climbing is allowed
    pub max_altitude_ratio: f64,
    /// Lowest normalized distance to a no-fly zone
    pub no_fly_margin: f64,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            min_altitude_ratio: 0.1,
            min_proximity: 0.05,
            min_energy: 0.1,
            min_stability: 0.2,
            max_altitude_ratio: 0.95,
            no_fly_margin: 0.1,
        }
    }
}

impl SafetyThresholds {
    /// Every threshold must lie in [0, 1]
    pub fn validate(&self) -> Result<(), ConfigError> {
        unit_interval("safety.min_altitude_ratio", self.min_altitude_ratio)?;
        unit_interval("safety.min_proximity", self.min_proximity)?;
        unit_interval("safety.min_energy", self.min_energy)?;
        unit_interval("safety.min_stability", self.min_stability)?;
        unit_interval("safety.max_altitude_ratio", self.max_altitude_ratio)?;
        unit_interval("safety.no_fly_margin", self.no_fly_margin)?;
        Ok(())
    }
}

/// Ordered, versioned set of active rules
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTable {
    version: u32,
    rules: Vec<VetoRule>,
}

impl RuleTable {
    /// Resolve rule identifiers, keeping their order
    ///
    /// An empty list is allowed and approves every candidate.
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Result<Self, ConfigError> {
        let mut rules: Vec<VetoRule> = Vec::with_capacity(ids.len());
        for id in ids {
            let rule: VetoRule = id.as_ref().parse()?;
            if rules.contains(&rule) {
                return Err(ConfigError::DuplicateVetoRule(rule.id().to_string()));
            }
            rules.push(rule);
        }
        Ok(Self {
            version: RULE_TABLE_VERSION,
            rules,
        })
    }

    /// Rule semantics version
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Active rules in priority order
    pub fn rules(&self) -> &[VetoRule] {
        &self.rules
    }

    /// First rule that fires, if any
    pub fn first_match(
        &self,
        candidate: &ActionCandidate,
        context: &ReviewContext,
        thresholds: &SafetyThresholds,
    ) -> Option<VetoRule> {
        self.rules
            .iter()
            .copied()
            .find(|rule| rule.matches(candidate, context, thresholds))
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self {
            version: RULE_TABLE_VERSION,
            rules: VetoRule::DEFAULT_ORDER.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeatureVector;

    fn candidate(action: Action, features: [f64; 5]) -> ActionCandidate {
        ActionCandidate {
            action,
            probabilities: [0.2; 5],
            value_estimate: 0.0,
            features: FeatureVector::new(features),
            fallback: false,
        }
    }

    #[test]
    fn test_ids_round_trip_through_parse() {
        for rule in VetoRule::DEFAULT_ORDER {
            assert_eq!(rule.id().parse::<VetoRule>().unwrap(), rule);
        }
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        assert_eq!(
            RuleTable::from_ids(&["ceiling", "ceiling"]),
            Err(ConfigError::DuplicateVetoRule("ceiling".into()))
        );
    }

    #[test]
    fn test_order_decides_which_rule_fires() {
        // Low altitude and low proximity both match.
        let c = candidate(Action::Forward, [0.8, 0.9, 0.5, 0.05, 0.02]);
        let thresholds = SafetyThresholds::default();
        let ctx = ReviewContext::new(1);

        let table = RuleTable::from_ids(&["altitude_floor", "obstacle_proximity"]).unwrap();
        assert_eq!(
            table.first_match(&c, &ctx, &thresholds),
            Some(VetoRule::AltitudeFloor)
        );

        let table = RuleTable::from_ids(&["obstacle_proximity", "altitude_floor"]).unwrap();
        assert_eq!(
            table.first_match(&c, &ctx, &thresholds),
            Some(VetoRule::ObstacleProximity)
        );
    }

    #[test]
    fn test_hover_exempt_from_energy_and_stability_rules() {
        let thresholds = SafetyThresholds::default();
        let ctx = ReviewContext::new(1);
        let weak = [0.05, 0.1, 0.5, 0.5, 0.5];

        assert!(!VetoRule::LowEnergy.matches(&candidate(Action::Hover, weak), &ctx, &thresholds));
        assert!(VetoRule::LowEnergy.matches(&candidate(Action::Forward, weak), &ctx, &thresholds));
        assert!(!VetoRule::Instability.matches(&candidate(Action::Hover, weak), &ctx, &thresholds));
        assert!(VetoRule::Instability.matches(&candidate(Action::Climb, weak), &ctx, &thresholds));
    }

    #[test]
    fn test_ceiling_and_no_fly_zone() {
        let thresholds = SafetyThresholds::default();
        let high = [0.8, 0.9, 0.5, 0.97, 0.5];
        let ctx = ReviewContext::new(1);

        assert!(VetoRule::Ceiling.matches(&candidate(Action::Climb, high), &ctx, &thresholds));
        assert!(!VetoRule::Ceiling.matches(&candidate(Action::Forward, high), &ctx, &thresholds));

        let c = candidate(Action::Forward, [0.8, 0.9, 0.5, 0.5, 0.5]);
        assert!(!VetoRule::NoFlyZone.matches(&c, &ctx, &thresholds));
        assert!(VetoRule::NoFlyZone.matches(&c, &ctx.clone().with_no_fly_zone(0.05), &thresholds));
        assert!(!VetoRule::NoFlyZone.matches(&c, &ctx.with_no_fly_zone(0.5), &thresholds));
    }

    #[test]
    fn test_thresholds_must_be_unit_interval() {
        let thresholds = SafetyThresholds {
            min_energy: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            thresholds.validate(),
            Err(ConfigError::OutOfRange { field: "safety.min_energy", .. })
        ));
    }
}
