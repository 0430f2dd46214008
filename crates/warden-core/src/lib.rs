//! Warden Core - decision logic for a supervised drone control pipeline
//!
//! Warden picks a drone's next action by pushing each sensor sample through
//! a fixed chain of stages, scoring the proposed action against weighted
//! principles and letting hard safety rules veto it. Everything in this crate
//! is synchronous and free of I/O; `warden-runtime` wires it into tasks.
//!
//! # Architecture
//!
//! 1. **Features** (`features`): sensor sample -> normalized feature vector
//! 2. **Prediction** (`prediction`): untrusted policy output -> legal candidate
//! 3. **Alignment** (`alignment`): weighted principle scoring
//! 4. **Safety** (`safety`): ordered veto rules
//! 5. **Integrity** (`integrity`): drift / hallucination checks and counters
//! 6. **Supervision** (`supervision`): restart and quarantine state machine
//!
//! # Quick Start
//!
//! ```
//! use warden_core::{DecisionEngine, IntegrityStats, PolicyOutput, SessionConfig, SessionKind};
//! use warden_core::safety::ReviewContext;
//! use warden_core::types::{FeatureVector, Action};
//!
//! let engine = DecisionEngine::from_config(&SessionConfig::default()).unwrap();
//!
//! // Low altitude: the altitude floor vetoes anything but the fallback.
//! let features = FeatureVector::new([0.1, 0.9, 0.5, 0.05, 0.02]);
//! let output = PolicyOutput::new(vec![0.0, 0.0, 0.0, 0.0, 1.0], 0.2);
//!
//! let prediction = engine.predict(features, &output);
//! let reviewed = engine.decide(&prediction.candidate, &ReviewContext::new(1));
//!
//! assert!(reviewed.decision.vetoed);
//! assert_eq!(reviewed.decision.action, Action::Hover);
//!
//! let stats = IntegrityStats::new(SessionKind::Inference);
//! stats.record_step(reviewed.assessment.issues());
//! println!("{}", stats.report());
//! ```

#![deny(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod alignment;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod integrity;
pub mod prediction;
pub mod safety;
pub mod supervision;
pub mod types;

// Re-export commonly used types for convenience
pub use alignment::{AlignmentScore, AlignmentScorer, Principle, PrincipleScore, WeightTable};
pub use config::{DegradedMode, PreprocessLimits, SessionConfig};
pub use engine::{DecisionEngine, Observation, Preprocessed, Reviewed};
pub use error::{ConfigError, ErrorCategory, Result, StageError, WardenError};
pub use features::FeatureExtractor;
pub use integrity::{
    Classification, IntegrityReport, IntegrityStats, IntegrityValidator, SessionKind, Verdict,
};
pub use prediction::Prediction;
pub use safety::{
    Geofence, NoFlyZone, ReviewContext, RuleTable, SafetyController, SafetyThresholds, VetoRule,
};
pub use supervision::{AgentKind, AgentState, HealthBoard, SupervisionPolicy};
pub use types::{
    Action, ActionCandidate, Decision, FeatureVector, PolicyOutput, RawFrame, SensorSample,
    Timestamp,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
