//! Error types for Warden Core
//!
//! This module defines all error types used throughout the decision pipeline.
//! We use `thiserror` for ergonomic error definitions with automatic Display/Error implementations.
//!
//! Nothing in here ever reaches the Decision consumer directly: stage errors are
//! resolved into fallback decisions, and configuration errors reject the session.

use crate::supervision::AgentKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Main error type for Warden operations
#[derive(Error, Debug)]
pub enum WardenError {
    /// Session configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pipeline stage contract failures
    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    /// Session lifecycle misuse
    #[error("Session error: {0}")]
    Session(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        /// What was being attempted
        context: String,
        /// The underlying error
        source: Box<WardenError>,
    },
}

/// Configuration invariant violations, detected at session start
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Negative or non-finite principle weight
    #[error("Principle weight for '{principle}' must be finite and >= 0, got {weight}")]
    InvalidWeight {
        /// Principle the weight belongs to
        principle: String,
        /// The rejected weight
        weight: f64,
    },

    /// Principle name outside the fixed principle set
    #[error("Unknown principle: {0}")]
    UnknownPrinciple(String),

    /// Empty weight table
    #[error("No principles configured")]
    EmptyPrinciples,

    /// Every weight is zero
    #[error("Sum of principle weights must be > 0")]
    ZeroTotalWeight,

    /// Finite weights whose sum is not
    #[error("Sum of principle weights overflows: {0}")]
    NonFiniteTotalWeight(f64),

    /// Rule identifier outside rule table v1
    #[error("Unknown veto rule: {0}")]
    UnknownVetoRule(String),

    /// Rule listed more than once in the priority order
    #[error("Veto rule listed twice: {0}")]
    DuplicateVetoRule(String),

    /// Zero (or non-finite) where a positive value is required
    #[error("{field} must be > 0")]
    MustBePositive {
        /// Offending configuration key
        field: &'static str,
    },

    /// Value outside its allowed interval
    #[error("{field} must be in range [{min}, {max}], got {value}")]
    OutOfRange {
        /// Offending configuration key
        field: &'static str,
        /// The rejected value
        value: f64,
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },
}

/// Failures of a pipeline stage contract call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// The sensor source stayed silent
    #[error("No sensor frame within {timeout_ms}ms")]
    SensorTimeout {
        /// Configured sensor timeout
        timeout_ms: u64,
    },

    /// An agent stopped sending heartbeats
    #[error("Agent {0} missed its heartbeat")]
    AgentHeartbeatMissed(AgentKind),

    /// The policy did not answer in time
    #[error("Policy call timed out after {timeout_ms}ms")]
    PolicyCallTimeout {
        /// Configured policy timeout
        timeout_ms: u64,
    },

    /// The policy returned an error
    #[error("Policy call failed: {0}")]
    PolicyFailed(String),

    /// Sample older than the staleness threshold
    #[error("Sensor sample {sequence} is stale: age {age_ms}ms exceeds {threshold_ms}ms")]
    StaleFeature {
        /// Sequence number of the sample
        sequence: u64,
        /// Age of the capture when preprocessing saw it
        age_ms: i64,
        /// Configured threshold
        threshold_ms: u64,
    },

    /// A computed feature left [0, 1] or was not finite
    #[error("Feature '{feature}' out of range: {value}")]
    OutOfRangeFeature {
        /// Feature name
        feature: &'static str,
        /// The computed value
        value: f64,
    },

    /// Policy nominated an action outside the action set
    #[error("Invalid action index {index} (action set has {len} actions)")]
    InvalidAction {
        /// Nominated index
        index: usize,
        /// Size of the action set
        len: usize,
    },

    /// Policy distribution is not a valid simplex
    #[error("Invalid action distribution: {0}")]
    InvalidDistribution(String),

    /// No more frames will arrive
    #[error("Sensor source closed")]
    SourceClosed,
}

/// How a stage error is handled by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Retried through the Supervisor's backoff
    Transient,
    /// Dropped or replaced locally, recorded by the integrity layer
    DataLevel,
    /// Ends the agent (or the input stream)
    Fatal,
}

impl StageError {
    /// Classify this error according to the pipeline error taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            StageError::SensorTimeout { .. }
            | StageError::AgentHeartbeatMissed(_)
            | StageError::PolicyCallTimeout { .. }
            | StageError::PolicyFailed(_) => ErrorCategory::Transient,
            StageError::StaleFeature { .. }
            | StageError::OutOfRangeFeature { .. }
            | StageError::InvalidAction { .. }
            | StageError::InvalidDistribution(_) => ErrorCategory::DataLevel,
            StageError::SourceClosed => ErrorCategory::Fatal,
        }
    }

    /// Whether the Supervisor must hear about this failure
    pub fn is_reportable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

impl WardenError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context() {
        let err = WardenError::from(ConfigError::EmptyPrinciples);
        let err = err.context("Failed to start session");

        assert!(err.to_string().contains("Failed to start session"));
        assert!(err.to_string().contains("No principles configured"));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(ConfigError::ZeroTotalWeight.into());
        let result = result.with_context(|| "validating weights".to_string());

        assert!(result
            .unwrap_err()
            .to_string()
            .starts_with("validating weights"));
    }

    #[test]
    fn test_stage_error_taxonomy() {
        assert_eq!(
            StageError::SensorTimeout { timeout_ms: 10 }.category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            StageError::PolicyCallTimeout { timeout_ms: 10 }.category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            StageError::InvalidDistribution("sum".into()).category(),
            ErrorCategory::DataLevel
        );
        assert_eq!(
            StageError::StaleFeature {
                sequence: 1,
                age_ms: 500,
                threshold_ms: 100
            }
            .category(),
            ErrorCategory::DataLevel
        );
        assert!(!StageError::OutOfRangeFeature {
            feature: "energy",
            value: 1.5
        }
        .is_reportable());
        assert_eq!(StageError::SourceClosed.category(), ErrorCategory::Fatal);
    }
}
