//! Integrity layer
//!
//! Continuous auditing of everything that flows through the pipeline:
//!
//! - [`validator`]: stateless checks returning OK / Drift / Hallucination
//! - [`stats`]: session-scoped counters fed by validator outcomes

pub mod stats;
pub mod validator;

pub use stats::{IntegrityReport, IntegrityStats, SessionKind};
pub use validator::{
    Assessment, Check, Classification, IntegrityValidator, Verdict, DEFAULT_SIMPLEX_TOLERANCE,
    STRICT_SIMPLEX_TOLERANCE,
};
