//! Agent supervision
//!
//! An event-driven restart/quarantine state machine per pipeline agent. The
//! runtime feeds it heartbeats, failure reports and probe results and acts on
//! the [`Directive`]s it returns; nothing here spawns tasks or reads a clock.

pub mod board;
pub mod health;

pub use board::{AgentHealthSnapshot, HealthBoard, HealthEvent, Routing};
pub use health::{AgentHealthRecord, AgentState, Directive, SupervisionPolicy};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The supervised pipeline agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Sensor source to sample queue
    Ingestion,
    /// Sample to feature vector
    Preprocess,
    /// Feature vector to action candidate
    Prediction,
}

impl AgentKind {
    /// Every agent, in pipeline order
    pub const ALL: [AgentKind; 3] = [
        AgentKind::Ingestion,
        AgentKind::Preprocess,
        AgentKind::Prediction,
    ];

    /// Lowercase agent name
    pub fn name(self) -> &'static str {
        match self {
            AgentKind::Ingestion => "ingestion",
            AgentKind::Preprocess => "preprocess",
            AgentKind::Prediction => "prediction",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
