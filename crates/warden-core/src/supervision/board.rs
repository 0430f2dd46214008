//! The supervisor's view of every agent

use super::health::{AgentHealthRecord, AgentState, Directive, SupervisionPolicy};
use super::AgentKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Something an agent reported to the supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    /// Liveness signal
    Heartbeat,
    /// Contract failure (timeout, policy error, source error)
    Failure(String),
    /// Result of the post-restart health probe
    Probe {
        /// Whether the agent answered healthy
        ok: bool,
    },
    /// The agent finished its input and exited normally
    Retired,
}

/// Which agents stages may still route work to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    /// Agents out of rotation
    pub quarantined: BTreeSet<AgentKind>,
}

impl Routing {
    /// Whether work may still be routed to `kind`
    pub fn is_routed(&self, kind: AgentKind) -> bool {
        !self.quarantined.contains(&kind)
    }

    /// True once any agent has been taken out of rotation
    pub fn is_degraded(&self) -> bool {
        !self.quarantined.is_empty()
    }
}

/// Serializable copy of one health record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealthSnapshot {
    /// Agent
    pub kind: AgentKind,
    /// Lifecycle state
    pub state: AgentState,
    /// Failures since the last successful probe
    pub consecutive_failures: u32,
    /// Restarts issued so far
    pub restart_attempts: u32,
    /// Most recent failure reason
    pub last_failure: Option<String>,
}

impl From<&AgentHealthRecord> for AgentHealthSnapshot {
    fn from(record: &AgentHealthRecord) -> Self {
        Self {
            kind: record.kind,
            state: record.state,
            consecutive_failures: record.consecutive_failures,
            restart_attempts: record.restart_attempts,
            last_failure: record.last_failure.clone(),
        }
    }
}

/// Health records for all agents of one session
#[derive(Debug, Clone)]
pub struct HealthBoard {
    policy: SupervisionPolicy,
    records: BTreeMap<AgentKind, AgentHealthRecord>,
    retired: BTreeSet<AgentKind>,
}

impl HealthBoard {
    /// Fresh records, all `Running`
    pub fn new(policy: SupervisionPolicy, now: Instant) -> Self {
        let records = AgentKind::ALL
            .iter()
            .map(|&kind| (kind, AgentHealthRecord::new(kind, now)))
            .collect();
        Self {
            policy,
            records,
            retired: BTreeSet::new(),
        }
    }

    /// Restart and quarantine limits
    pub fn policy(&self) -> &SupervisionPolicy {
        &self.policy
    }

    /// Full record of one agent
    pub fn record(&self, kind: AgentKind) -> Option<&AgentHealthRecord> {
        self.records.get(&kind)
    }

    /// Current state of one agent
    pub fn state(&self, kind: AgentKind) -> Option<AgentState> {
        self.record(kind).map(|r| r.state)
    }

    /// Whether the agent finished its input normally
    pub fn is_retired(&self, kind: AgentKind) -> bool {
        self.retired.contains(&kind)
    }

    /// Feed one agent event through the state machine
    ///
    /// Retired agents keep their last state and ignore further events.
    pub fn apply(&mut self, kind: AgentKind, event: HealthEvent, now: Instant) -> Option<Directive> {
        if self.retired.contains(&kind) {
            return None;
        }
        let policy = &self.policy;
        let record = self.records.get_mut(&kind)?;
        match event {
            HealthEvent::Retired => {
                self.retired.insert(kind);
                None
            }
            HealthEvent::Heartbeat => {
                record.heartbeat(now);
                None
            }
            HealthEvent::Failure(reason) => record.fail(reason, now, policy),
            HealthEvent::Probe { ok } => record.probe(ok, now, policy),
        }
    }

    /// Periodic health check over every agent
    pub fn poll(&mut self, now: Instant) -> Vec<(AgentKind, Directive)> {
        let policy = &self.policy;
        let retired = &self.retired;
        self.records
            .iter_mut()
            .filter(|(kind, _)| !retired.contains(*kind))
            .filter_map(|(&kind, record)| record.poll(now, policy).map(|d| (kind, d)))
            .collect()
    }

    /// Agents that stages may still route to
    pub fn routing(&self) -> Routing {
        Routing {
            quarantined: self
                .records
                .values()
                .filter(|r| r.is_quarantined())
                .map(|r| r.kind)
                .collect(),
        }
    }

    /// Serializable copy of every record
    pub fn snapshot(&self) -> Vec<AgentHealthSnapshot> {
        self.records.values().map(AgentHealthSnapshot::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_board_starts_running() {
        let board = HealthBoard::new(SupervisionPolicy::default(), Instant::now());
        assert_eq!(board.snapshot().len(), AgentKind::ALL.len());
        assert!(board
            .snapshot()
            .iter()
            .all(|s| s.state == AgentState::Running));
        assert!(!board.routing().is_degraded());
    }

    #[test]
    fn test_quarantine_removes_agent_from_routing() {
        let policy = SupervisionPolicy {
            failure_limit: 1,
            ..Default::default()
        };
        let t0 = Instant::now();
        let mut board = HealthBoard::new(policy.clone(), t0);

        board.apply(AgentKind::Prediction, HealthEvent::Failure("timeout".into()), t0);
        let t1 = t0 + policy.backoff(1);
        // Heartbeats keep the other agents healthy.
        board.apply(AgentKind::Ingestion, HealthEvent::Heartbeat, t1);
        board.apply(AgentKind::Preprocess, HealthEvent::Heartbeat, t1);
        assert_eq!(
            board.poll(t1),
            vec![(AgentKind::Prediction, Directive::Restart)]
        );

        let directive = board.apply(AgentKind::Prediction, HealthEvent::Probe { ok: false }, t1);
        assert_eq!(directive, Some(Directive::Quarantine));

        let routing = board.routing();
        assert!(!routing.is_routed(AgentKind::Prediction));
        assert!(routing.is_routed(AgentKind::Ingestion));
        assert!(routing.is_degraded());
    }

    #[test]
    fn test_silent_agents_are_detected_by_poll() {
        let policy = SupervisionPolicy::default();
        let t0 = Instant::now();
        let mut board = HealthBoard::new(policy.clone(), t0);

        let late = t0 + policy.heartbeat_timeout + Duration::from_millis(1);
        board.apply(AgentKind::Ingestion, HealthEvent::Heartbeat, late);
        board.poll(late);

        assert_eq!(board.state(AgentKind::Ingestion), Some(AgentState::Running));
        assert_eq!(board.state(AgentKind::Preprocess), Some(AgentState::Failed));
        assert_eq!(board.state(AgentKind::Prediction), Some(AgentState::Failed));
    }

    #[test]
    fn test_retired_agents_are_not_polled() {
        let policy = SupervisionPolicy::default();
        let t0 = Instant::now();
        let mut board = HealthBoard::new(policy.clone(), t0);

        board.apply(AgentKind::Ingestion, HealthEvent::Retired, t0);
        let late = t0 + policy.heartbeat_timeout * 4;
        let directives = board.poll(late);

        assert!(board.is_retired(AgentKind::Ingestion));
        assert_eq!(board.state(AgentKind::Ingestion), Some(AgentState::Running));
        assert!(directives.iter().all(|(kind, _)| *kind != AgentKind::Ingestion));
        assert_eq!(
            board.apply(AgentKind::Ingestion, HealthEvent::Failure("late".into()), late),
            None
        );
    }
}
