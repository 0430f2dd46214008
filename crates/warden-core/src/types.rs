//! Core types for Warden
//!
//! This module defines the values that flow through the decision pipeline:
//! - Raw sensor frames and sequenced samples
//! - Normalized feature vectors
//! - The fixed action set and policy-produced candidates
//! - The final Decision handed to the actuation layer

use crate::alignment::AlignmentScore;
use crate::safety::VetoRule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp type alias
pub type Timestamp = DateTime<Utc>;

/// Create a timestamp for the current moment
pub fn now() -> Timestamp {
    Utc::now()
}

/// Number of components in a [`FeatureVector`]
pub const FEATURE_DIM: usize = 5;

/// Number of actions in the legal action set
pub const ACTION_COUNT: usize = 5;

const _: () = assert!(ACTION_COUNT > 0, "action set must not be empty");

/// The fixed, enumerated action set
///
/// The declaration order is the stable tie-break order used by the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Hold position; the safe fallback
    Hover,
    /// Gain altitude
    Climb,
    /// Yaw left
    TurnLeft,
    /// Yaw right
    TurnRight,
    /// Fly ahead
    Forward,
}

impl Action {
    /// All actions, indexed by their policy output position
    pub const ALL: [Action; ACTION_COUNT] = [
        Action::Hover,
        Action::Climb,
        Action::TurnLeft,
        Action::TurnRight,
        Action::Forward,
    ];

    /// Position of this action in a policy distribution
    pub fn index(self) -> usize {
        self as usize
    }

    /// Look up an action by distribution index
    pub fn from_index(index: usize) -> Option<Action> {
        Self::ALL.get(index).copied()
    }

    /// Relative energy cost of executing this action (0.0-1.0)
    pub fn energy_cost(self) -> f64 {
        match self {
            Action::Hover => 0.2,
            Action::Forward => 0.4,
            Action::TurnLeft | Action::TurnRight => 0.5,
            Action::Climb => 0.8,
        }
    }

    /// How aggressive the maneuver is (0.0 = none)
    pub fn maneuver_intensity(self) -> f64 {
        match self {
            Action::Hover => 0.0,
            Action::Forward => 0.2,
            Action::Climb => 0.4,
            Action::TurnLeft | Action::TurnRight => 0.6,
        }
    }

    /// Wire name of this action
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Hover => "hover",
            Action::Climb => "climb",
            Action::TurnLeft => "turn_left",
            Action::TurnRight => "turn_right",
            Action::Forward => "forward",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("unknown action '{s}'"))
    }
}

/// GPS fix attached to a frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Latitude, in degrees
    pub latitude: f64,
    /// Longitude, in degrees
    pub longitude: f64,
    /// GPS altitude, in meters
    pub altitude_m: f64,
}

/// Attitude reported by the IMU, in radians
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuReading {
    /// Roll
    pub roll_rad: f64,
    /// Pitch
    pub pitch_rad: f64,
    /// Yaw (heading)
    pub yaw_rad: f64,
}

/// Barometric altitude estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarometerReading {
    /// Barometric altitude, in meters
    pub altitude_m: f64,
}

/// One raw sensor frame as delivered by the hardware layer
///
/// The camera payload is opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    /// When the sensors captured this frame
    pub captured_at: Timestamp,

    /// Opaque camera payload
    #[serde(default)]
    pub camera: Vec<u8>,

    /// GPS fix
    pub gps: GpsFix,
    /// IMU attitude
    pub imu: ImuReading,
    /// Barometer reading
    pub barometer: BarometerReading,

    /// Remaining battery, in percent (0-100)
    pub battery_pct: f64,

    /// Distance to the nearest obstacle reported by the range sensor
    pub obstacle_distance_m: f64,
}

/// A sequenced, immutable sensor sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Monotonic sequence number assigned by ingestion
    pub sequence: u64,

    /// When ingestion accepted the frame
    pub received_at: Timestamp,

    /// The frame itself
    pub frame: RawFrame,
}

impl SensorSample {
    /// Age of the underlying capture at `now`, in milliseconds
    pub fn age_ms(&self, now: Timestamp) -> i64 {
        (now - self.frame.captured_at).num_milliseconds()
    }
}

/// Named components of a [`FeatureVector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Battery level
    Energy,
    /// Inverse of combined tilt
    Stability,
    /// Heading as a fraction of a full turn
    Orientation,
    /// Fused altitude over the configured maximum
    AltitudeRatio,
    /// Obstacle distance over sensor range
    Proximity,
}

impl Feature {
    /// All features in vector order
    pub const ALL: [Feature; FEATURE_DIM] = [
        Feature::Energy,
        Feature::Stability,
        Feature::Orientation,
        Feature::AltitudeRatio,
        Feature::Proximity,
    ];

    /// Field name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Feature::Energy => "energy",
            Feature::Stability => "stability",
            Feature::Orientation => "orientation",
            Feature::AltitudeRatio => "altitude_ratio",
            Feature::Proximity => "proximity",
        }
    }
}

/// Fixed-size normalized feature vector
///
/// Every component is expected to lie in [0, 1]. Construction does not
/// enforce that; the integrity validator classifies violations as drift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector([f64; FEATURE_DIM]);

impl FeatureVector {
    /// Build a vector from raw components, in [`Feature::ALL`] order
    pub fn new(components: [f64; FEATURE_DIM]) -> Self {
        Self(components)
    }

    /// Value of one named component
    pub fn get(&self, feature: Feature) -> f64 {
        self.0[feature as usize]
    }

    /// Battery level component
    pub fn energy(&self) -> f64 {
        self.get(Feature::Energy)
    }

    /// Stability component
    pub fn stability(&self) -> f64 {
        self.get(Feature::Stability)
    }

    /// Heading component
    pub fn orientation(&self) -> f64 {
        self.get(Feature::Orientation)
    }

    /// Altitude ratio component
    pub fn altitude_ratio(&self) -> f64 {
        self.get(Feature::AltitudeRatio)
    }

    /// Obstacle proximity component
    pub fn proximity(&self) -> f64 {
        self.get(Feature::Proximity)
    }

    /// Components in feature order
    pub fn as_array(&self) -> &[f64; FEATURE_DIM] {
        &self.0
    }

    /// Iterate `(feature, value)` pairs in vector order
    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        Feature::ALL.iter().copied().zip(self.0.iter().copied())
    }

    /// Whether every component is finite and inside [0, 1]
    pub fn is_normalized(&self) -> bool {
        self.0.iter().all(|v| (0.0..=1.0).contains(v))
    }
}

/// Untrusted output of the external policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyOutput {
    /// Probability per action, indexed by [`Action::index`]
    pub probabilities: Vec<f64>,

    /// Scalar state-value estimate
    pub value_estimate: f64,

    /// Action index nominated by the policy (sampled); greedy when absent
    #[serde(default)]
    pub action: Option<usize>,
}

impl PolicyOutput {
    /// Output with no nominated action
    pub fn new(probabilities: Vec<f64>, value_estimate: f64) -> Self {
        Self {
            probabilities,
            value_estimate,
            action: None,
        }
    }

    /// Nominate an explicit action index
    pub fn with_action(mut self, index: usize) -> Self {
        self.action = Some(index);
        self
    }

    /// Greedy choice: highest probability, lowest index on ties
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &p) in self.probabilities.iter().enumerate() {
            match best {
                Some((_, bp)) if p <= bp => {}
                _ => best = Some((i, p)),
            }
        }
        best.map(|(i, _)| i)
    }
}

/// A validated, legal action proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCandidate {
    /// The chosen action
    pub action: Action,
    /// Distribution over the action set, in action order
    pub probabilities: [f64; ACTION_COUNT],
    /// Policy value estimate
    pub value_estimate: f64,
    /// Features the candidate was predicted from
    pub features: FeatureVector,

    /// Set when the policy output was replaced by the safe fallback
    pub fallback: bool,
}

impl ActionCandidate {
    /// The safe fallback candidate: hover with all mass on hover
    pub fn fallback(features: FeatureVector) -> Self {
        Self::substitute(Action::Hover, features)
    }

    /// A pipeline-made candidate with all mass on `action`
    pub fn substitute(action: Action, features: FeatureVector) -> Self {
        let mut probabilities = [0.0; ACTION_COUNT];
        probabilities[action.index()] = 1.0;
        Self {
            action,
            probabilities,
            value_estimate: 0.0,
            features,
            fallback: true,
        }
    }

    /// Probability the policy assigned to the chosen action
    pub fn confidence(&self) -> f64 {
        self.probabilities[self.action.index()]
    }

    /// Same distribution and features, different action
    pub fn with_action(&self, action: Action) -> Self {
        Self {
            action,
            ..self.clone()
        }
    }
}

/// Final output of the pipeline for one sensor sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Sequence number of the originating sample
    pub sequence: u64,

    /// Action to actuate
    pub action: Action,

    /// Alignment score of the reviewed candidate, when one was scored
    pub alignment: Option<AlignmentScore>,

    /// Whether the safety controller overrode the candidate
    pub vetoed: bool,

    /// The rule that fired, if vetoed
    pub veto_rule: Option<VetoRule>,

    /// The action that was proposed before a veto
    pub proposed: Option<Action>,

    /// Why the pipeline fell back to a degraded output, if it did
    pub degraded: Option<String>,

    /// When the decision was made
    pub decided_at: Timestamp,
}

impl Decision {
    /// A degraded decision produced without a scored candidate
    pub fn degraded(sequence: u64, action: Action, reason: impl Into<String>) -> Self {
        Self {
            sequence,
            action,
            alignment: None,
            vetoed: false,
            veto_rule: None,
            proposed: None,
            degraded: Some(reason.into()),
            decided_at: now(),
        }
    }

    /// Whether the decision carries the policy's (approved) choice
    pub fn is_approved(&self) -> bool {
        !self.vetoed && self.degraded.is_none()
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.sequence, self.action)?;
        if let Some(score) = &self.alignment {
            write!(f, " score={:.3}", score.value)?;
        }
        if let Some(rule) = self.veto_rule {
            write!(f, " VETO[{}]", rule)?;
            if let Some(proposed) = self.proposed {
                write!(f, " (proposed {})", proposed)?;
            }
        }
        if let Some(reason) = &self.degraded {
            write!(f, " degraded: {}", reason)?;
        }
        Ok(())
    }
}
