//! Typed messages exchanged between stages and the supervisor

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use warden_core::supervision::{Directive, HealthEvent, Routing};
use warden_core::prediction::Prediction;
use warden_core::safety::ReviewContext;
use warden_core::{AgentKind, Observation};

/// Agent -> supervisor
#[derive(Debug, Clone, PartialEq)]
pub struct AgentEvent {
    pub kind: AgentKind,
    pub event: HealthEvent,
}

/// Supervisor -> agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand {
    /// Reset internal state and answer with a health probe
    Restart,
    /// Stop doing work; inputs are routed to the degraded path
    Quarantine,
}

impl From<Directive> for AgentCommand {
    fn from(directive: Directive) -> Self {
        match directive {
            Directive::Restart => AgentCommand::Restart,
            Directive::Quarantine => AgentCommand::Quarantine,
        }
    }
}

/// One sequence number travelling down the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Staged<T> {
    Ready { sequence: u64, payload: T },
    /// Already recorded as a dropped step upstream
    Dropped { sequence: u64 },
    /// The stage that should have handled it is out of rotation
    Degraded {
        sequence: u64,
        observation: Option<Observation>,
        reason: String,
    },
}

impl<T> Staged<T> {
    pub fn sequence(&self) -> u64 {
        match self {
            Staged::Ready { sequence, .. }
            | Staged::Dropped { sequence }
            | Staged::Degraded { sequence, .. } => *sequence,
        }
    }

    /// Re-type a non-ready item for the next hop
    ///
    /// Returns the payload back for `Ready` items.
    pub fn forward<U>(self) -> Result<Staged<U>, (u64, T)> {
        match self {
            Staged::Ready { sequence, payload } => Err((sequence, payload)),
            Staged::Dropped { sequence } => Ok(Staged::Dropped { sequence }),
            Staged::Degraded {
                sequence,
                observation,
                reason,
            } => Ok(Staged::Degraded {
                sequence,
                observation,
                reason,
            }),
        }
    }
}

/// A validated candidate plus the geofence distance of its sample
#[derive(Debug, Clone, PartialEq)]
pub struct Predicted {
    pub prediction: Prediction,
    pub no_fly_zone_distance: Option<f64>,
}

impl Predicted {
    pub fn new(prediction: Prediction, observation: &Observation) -> Self {
        Self {
            prediction,
            no_fly_zone_distance: observation.no_fly_zone_distance,
        }
    }

    pub fn review_context(&self, sequence: u64) -> ReviewContext {
        ReviewContext {
            sequence,
            no_fly_zone_distance: self.no_fly_zone_distance,
        }
    }
}

/// An agent's end of the supervision channels
///
/// Heartbeats travel on a bounded channel and may be lost when it is full;
/// failures, probes and retirement use an unbounded control channel and are
/// always delivered while the supervisor runs.
#[derive(Debug)]
pub struct AgentLink {
    pub kind: AgentKind,
    heartbeats: mpsc::Sender<AgentEvent>,
    control: mpsc::UnboundedSender<AgentEvent>,
    pub commands: mpsc::Receiver<AgentCommand>,
    routing: watch::Receiver<Routing>,
}

impl AgentLink {
    pub fn new(
        kind: AgentKind,
        heartbeats: mpsc::Sender<AgentEvent>,
        control: mpsc::UnboundedSender<AgentEvent>,
        commands: mpsc::Receiver<AgentCommand>,
        routing: watch::Receiver<Routing>,
    ) -> Self {
        Self {
            kind,
            heartbeats,
            control,
            commands,
            routing,
        }
    }

    /// Whether the supervisor still routes work to this agent
    pub fn is_routed(&self) -> bool {
        self.routing.borrow().is_routed(self.kind)
    }

    // Never blocks the data path; a full channel loses the heartbeat.
    pub fn heartbeat(&self) {
        match self.heartbeats.try_send(self.event(HealthEvent::Heartbeat)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(agent = %self.kind, "heartbeat channel full, heartbeat lost");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(agent = %self.kind, "supervisor gone");
            }
        }
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.control(HealthEvent::Failure(reason.into()));
    }

    pub fn probe(&self, ok: bool) {
        self.control(HealthEvent::Probe { ok });
    }

    pub fn retire(&self) {
        self.control(HealthEvent::Retired);
    }

    fn event(&self, event: HealthEvent) -> AgentEvent {
        AgentEvent {
            kind: self.kind,
            event,
        }
    }

    fn control(&self, event: HealthEvent) {
        if self.control.send(self.event(event)).is_err() {
            debug!(agent = %self.kind, "supervisor gone");
        }
    }
}
