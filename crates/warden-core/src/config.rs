//! Session configuration
//!
//! Every option has a default, so a TOML file only needs to name what it
//! changes. [`SessionConfig::validate`] is the gate `start_session()` runs
//! before anything is spawned.

use crate::alignment::WeightTable;
use crate::error::{ConfigError, Result};
use crate::integrity::IntegrityValidator;
use crate::safety::{Geofence, NoFlyZone, RuleTable, SafetyThresholds, VetoRule};
use crate::supervision::SupervisionPolicy;
use crate::types::ACTION_COUNT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// What happens to inputs routed away from a quarantined agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedMode {
    /// Repeat the last approved action (re-reviewed by the safety controller)
    LastKnownGood,
    /// Always hover
    Hover,
    /// Stop the pipeline
    Halt,
}

/// Normalization limits used by feature extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessLimits {
    /// Altitude that maps to an altitude ratio of 1.0
    pub max_altitude_m: f64,

    /// Range sensor reach; farther readings saturate at proximity 1.0
    pub sensor_range_m: f64,

    /// Combined roll + pitch at which stability reaches 0.5
    pub max_tilt_rad: f64,

    /// Weight of the barometer in the fused altitude (GPS gets the rest)
    pub barometer_weight: f64,

    /// Distance from a no-fly zone boundary that maps to 1.0
    pub geofence_range_m: f64,
}

impl Default for PreprocessLimits {
    fn default() -> Self {
        Self {
            max_altitude_m: 120.0,
            sensor_range_m: 50.0,
            max_tilt_rad: 0.6,
            barometer_weight: 0.7,
            geofence_range_m: 500.0,
        }
    }
}

/// Main session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of the ingestion queue (oldest sample is evicted when full)
    pub queue_capacity: usize,

    /// Maximum sample age accepted by preprocessing
    pub staleness_threshold_ms: u64,

    /// Restarts attempted before an agent is quarantined
    pub restart_budget: u32,

    /// Base of the exponential restart backoff
    pub backoff_base_ms: u64,

    /// Consecutive failures tolerated before quarantine
    pub quarantine_threshold: u32,

    /// Version tag of the principle weight table
    pub principle_weights_version: u32,

    /// Principle name -> non-negative weight
    pub principle_weights: BTreeMap<String, f64>,

    /// Veto rule identifiers in priority order
    pub veto_rules: Vec<String>,

    /// Longest wait for a sensor frame
    pub sensor_timeout_ms: u64,

    /// Frames pulled per second; the source sets the pace when unset
    pub target_hz: Option<f64>,

    /// Longest wait for the external policy
    pub policy_timeout_ms: u64,

    /// How often live agents send heartbeats
    pub heartbeat_interval_ms: u64,

    /// Silence after which a heartbeat counts as missed
    pub heartbeat_timeout_ms: u64,

    /// Period of the supervisor's health-check loop
    pub health_check_interval_ms: u64,

    /// Time given to in-flight stages at shutdown
    pub shutdown_grace_ms: u64,

    /// Concurrent policy calls allowed in the prediction stage
    pub max_inflight_predictions: usize,

    /// How many of the policy's top actions are scored
    pub candidate_top_k: usize,

    /// Use the strict probability-sum tolerance
    pub strict_validation: bool,

    /// Fallback used while an agent is quarantined
    pub degraded_mode: DegradedMode,

    /// Circular zones the `no_fly_zone` rule keeps the drone away from
    pub no_fly_zones: Vec<NoFlyZone>,

    /// Feature normalization limits
    pub preprocess: PreprocessLimits,

    /// Veto rule thresholds
    pub safety: SafetyThresholds,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            staleness_threshold_ms: 250,
            restart_budget: 3,
            backoff_base_ms: 100,
            quarantine_threshold: 3,
            principle_weights_version: 1,
            principle_weights: default_weights(),
            veto_rules: VetoRule::DEFAULT_ORDER
                .iter()
                .map(|r| r.id().to_string())
                .collect(),
            sensor_timeout_ms: 1_000,
            target_hz: None,
            policy_timeout_ms: 50,
            heartbeat_interval_ms: 100,
            heartbeat_timeout_ms: 500,
            health_check_interval_ms: 100,
            shutdown_grace_ms: 1_000,
            max_inflight_predictions: 1,
            candidate_top_k: 1,
            strict_validation: false,
            degraded_mode: DegradedMode::LastKnownGood,
            no_fly_zones: Vec::new(),
            preprocess: PreprocessLimits::default(),
            safety: SafetyThresholds::default(),
        }
    }
}

fn default_weights() -> BTreeMap<String, f64> {
    [
        ("safety", 0.4),
        ("energy", 0.2),
        ("smoothness", 0.15),
        ("progress", 0.15),
        ("confidence", 0.1),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl SessionConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ingestion queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the maximum accepted sample age
    pub fn with_staleness_threshold_ms(mut self, ms: u64) -> Self {
        self.staleness_threshold_ms = ms;
        self
    }

    /// Set the restart budget
    pub fn with_restart_budget(mut self, budget: u32) -> Self {
        self.restart_budget = budget;
        self
    }

    /// Set the consecutive-failure quarantine threshold
    pub fn with_quarantine_threshold(mut self, threshold: u32) -> Self {
        self.quarantine_threshold = threshold;
        self
    }

    /// Set the base of the restart backoff
    pub fn with_backoff_base_ms(mut self, ms: u64) -> Self {
        self.backoff_base_ms = ms;
        self
    }

    /// Set (or add) one principle weight
    pub fn with_weight(mut self, principle: impl Into<String>, weight: f64) -> Self {
        self.principle_weights.insert(principle.into(), weight);
        self
    }

    /// Replace the veto rule order
    pub fn with_veto_rules<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.veto_rules = rules.into_iter().map(Into::into).collect();
        self
    }

    /// Set the longest wait for a sensor frame
    pub fn with_sensor_timeout_ms(mut self, ms: u64) -> Self {
        self.sensor_timeout_ms = ms;
        self
    }

    /// Pace ingestion at `hz` frames per second
    pub fn with_target_hz(mut self, hz: f64) -> Self {
        self.target_hz = Some(hz);
        self
    }

    /// Add a no-fly zone
    pub fn with_no_fly_zone(mut self, zone: NoFlyZone) -> Self {
        self.no_fly_zones.push(zone);
        self
    }

    /// Set the longest wait for the policy
    pub fn with_policy_timeout_ms(mut self, ms: u64) -> Self {
        self.policy_timeout_ms = ms;
        self
    }

    /// Set heartbeat period and the silence that counts as a miss
    pub fn with_heartbeat(mut self, interval_ms: u64, timeout_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self.heartbeat_timeout_ms = timeout_ms;
        self
    }

    /// Set the supervisor's health-check period
    pub fn with_health_check_interval_ms(mut self, ms: u64) -> Self {
        self.health_check_interval_ms = ms;
        self
    }

    /// Set the concurrent policy call limit
    pub fn with_max_inflight_predictions(mut self, n: usize) -> Self {
        self.max_inflight_predictions = n;
        self
    }

    /// Set how many top actions are scored
    pub fn with_candidate_top_k(mut self, k: usize) -> Self {
        self.candidate_top_k = k;
        self
    }

    /// Set the fallback for quarantined agents
    pub fn with_degraded_mode(mut self, mode: DegradedMode) -> Self {
        self.degraded_mode = mode;
        self
    }

    /// Switch between strict and lenient simplex tolerance
    pub fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check every configuration invariant
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        positive("queue_capacity", self.queue_capacity as u64)?;
        positive("staleness_threshold_ms", self.staleness_threshold_ms)?;
        positive("backoff_base_ms", self.backoff_base_ms)?;
        positive("sensor_timeout_ms", self.sensor_timeout_ms)?;
        positive("policy_timeout_ms", self.policy_timeout_ms)?;
        positive("heartbeat_interval_ms", self.heartbeat_interval_ms)?;
        positive("heartbeat_timeout_ms", self.heartbeat_timeout_ms)?;
        positive("health_check_interval_ms", self.health_check_interval_ms)?;
        positive("max_inflight_predictions", self.max_inflight_predictions as u64)?;

        if self.candidate_top_k == 0 || self.candidate_top_k > ACTION_COUNT {
            return Err(ConfigError::OutOfRange {
                field: "candidate_top_k",
                value: self.candidate_top_k as f64,
                min: 1.0,
                max: ACTION_COUNT as f64,
            });
        }

        let limits = &self.preprocess;
        positive_f("preprocess.max_altitude_m", limits.max_altitude_m)?;
        positive_f("preprocess.sensor_range_m", limits.sensor_range_m)?;
        positive_f("preprocess.max_tilt_rad", limits.max_tilt_rad)?;
        unit_interval("preprocess.barometer_weight", limits.barometer_weight)?;
        positive_f("preprocess.geofence_range_m", limits.geofence_range_m)?;

        if let Some(hz) = self.target_hz {
            positive_f("target_hz", hz)?;
            // At least one frame period must fit in the sensor timeout.
            let min_hz = 1_000.0 / self.sensor_timeout_ms as f64;
            if hz < min_hz {
                return Err(ConfigError::OutOfRange {
                    field: "target_hz",
                    value: hz,
                    min: min_hz,
                    max: f64::INFINITY,
                });
            }
        }
        for zone in &self.no_fly_zones {
            zone.validate()?;
        }

        self.safety.validate()?;
        self.weight_table()?;
        self.rule_table()?;
        Ok(())
    }

    /// Resolve the principle weights into a scoring table
    pub fn weight_table(&self) -> std::result::Result<WeightTable, ConfigError> {
        WeightTable::from_weights(self.principle_weights_version, &self.principle_weights)
    }

    /// Resolve the veto rule identifiers into a rule table
    pub fn rule_table(&self) -> std::result::Result<RuleTable, ConfigError> {
        RuleTable::from_ids(&self.veto_rules)
    }

    /// Validator matching the configured tolerance
    pub fn validator(&self) -> IntegrityValidator {
        if self.strict_validation {
            IntegrityValidator::strict()
        } else {
            IntegrityValidator::new()
        }
    }

    /// Configured zones, normalized by the preprocess geofence range
    pub fn geofence(&self) -> Geofence {
        Geofence::new(self.no_fly_zones.clone(), self.preprocess.geofence_range_m)
    }

    /// Restart/quarantine policy for the supervisor
    pub fn supervision_policy(&self) -> SupervisionPolicy {
        SupervisionPolicy {
            failure_limit: self.restart_budget.min(self.quarantine_threshold),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
        }
    }

    /// Maximum sample age
    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }

    /// Longest wait for a sensor frame
    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    /// Period between pulled frames, if ingestion is paced
    pub fn frame_period(&self) -> Option<Duration> {
        self.target_hz.map(|hz| Duration::from_secs_f64(1.0 / hz))
    }

    /// Longest wait for the policy
    pub fn policy_timeout(&self) -> Duration {
        Duration::from_millis(self.policy_timeout_ms)
    }

    /// Heartbeat period
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Supervisor health-check period
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Grace period for stages at shutdown
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn positive(field: &'static str, value: u64) -> std::result::Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::MustBePositive { field })
    } else {
        Ok(())
    }
}

fn positive_f(field: &'static str, value: f64) -> std::result::Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::MustBePositive { field })
    }
}

pub(crate) fn unit_interval(field: &'static str, value: f64) -> std::result::Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min: 0.0,
            max: 1.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.supervision_policy().failure_limit, 3);
        assert_eq!(config.rule_table().unwrap().rules().len(), 6);
    }

    #[test]
    fn test_config_builder() {
        let config = SessionConfig::new()
            .with_queue_capacity(2)
            .with_restart_budget(5)
            .with_quarantine_threshold(2)
            .with_weight("safety", 1.0);

        assert_eq!(config.queue_capacity, 2);
        assert_eq!(config.principle_weights["safety"], 1.0);
        assert_eq!(config.supervision_policy().failure_limit, 2);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let config = SessionConfig::new().with_weight("energy", -0.5);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn test_unknown_rule_rejected() {
        let config = SessionConfig::new().with_veto_rules(["altitude_floor", "moon_landing"]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownVetoRule("moon_landing".to_string()))
        );
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = SessionConfig::new().with_queue_capacity(0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::MustBePositive {
                field: "queue_capacity"
            })
        );
    }

    #[test]
    fn test_top_k_bounds() {
        assert!(SessionConfig::new().with_candidate_top_k(0).validate().is_err());
        assert!(SessionConfig::new()
            .with_candidate_top_k(ACTION_COUNT + 1)
            .validate()
            .is_err());
        assert!(SessionConfig::new()
            .with_candidate_top_k(ACTION_COUNT)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = SessionConfig::from_toml_str(
            r#"
            queue_capacity = 3
            restart_budget = 2
            veto_rules = ["obstacle_proximity", "altitude_floor"]
            degraded_mode = "halt"

            [principle_weights]
            safety = 2.0
            energy = 1.0

            [safety]
            min_altitude_ratio = 0.2
            "#,
        )
        .unwrap();

        assert_eq!(config.queue_capacity, 3);
        assert_eq!(config.restart_budget, 2);
        assert_eq!(config.degraded_mode, DegradedMode::Halt);
        assert_eq!(config.principle_weights.len(), 2);
        assert_eq!(config.safety.min_altitude_ratio, 0.2);
        assert_eq!(config.staleness_threshold_ms, 250);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_target_hz_must_fit_sensor_timeout() {
        let config = SessionConfig::new().with_sensor_timeout_ms(100);
        assert!(config.clone().with_target_hz(50.0).validate().is_ok());
        assert!(matches!(
            config.clone().with_target_hz(5.0).validate(),
            Err(ConfigError::OutOfRange { field: "target_hz", .. })
        ));
        assert_eq!(
            config.with_target_hz(0.0).validate(),
            Err(ConfigError::MustBePositive { field: "target_hz" })
        );
        assert_eq!(
            SessionConfig::new().with_target_hz(4.0).frame_period(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(SessionConfig::new().frame_period(), None);
    }

    #[test]
    fn test_no_fly_zones_from_toml() {
        let config = SessionConfig::from_toml_str(
            r#"
            target_hz = 25.0

            [[no_fly_zones]]
            latitude = 45.07
            longitude = 7.69
            radius_m = 150.0

            [preprocess]
            geofence_range_m = 300.0
            "#,
        )
        .unwrap();

        assert_eq!(config.no_fly_zones, vec![NoFlyZone::new(45.07, 7.69, 150.0)]);
        assert_eq!(config.target_hz, Some(25.0));
        assert!(config.validate().is_ok());
        assert_eq!(config.geofence().zones().len(), 1);

        let bad = SessionConfig::new().with_no_fly_zone(NoFlyZone::new(45.0, 7.0, -1.0));
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_load_from_file_round_trip() {
        let config = SessionConfig::new()
            .with_queue_capacity(16)
            .with_target_hz(40.0)
            .with_no_fly_zone(NoFlyZone::new(45.0, 7.0, 120.0));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes())
            .unwrap();

        let loaded = SessionConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
