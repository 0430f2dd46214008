//! Safety controller
//!
//! Hard veto rules evaluated after scoring. A veto is a normal [`Decision`]
//! outcome, never an error.
//!
//! [`Decision`]: crate::types::Decision

pub mod controller;
pub mod geofence;
pub mod rules;

pub use controller::{SafetyController, VETO_FALLBACK};
pub use geofence::{Geofence, NoFlyZone};
pub use rules::{ReviewContext, RuleTable, SafetyThresholds, VetoRule, RULE_TABLE_VERSION};
