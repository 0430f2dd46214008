//! Per-agent health state machine
//!
//! ```text
//! Running --fail--> Failed --backoff elapsed--> Restarting --probe ok--> Running
//!                     ^                             |
//!                     +---------fail / miss---------+
//! (any failure beyond the limit) --> Quarantined
//! ```
//!
//! Time is always passed in, so the machine runs the same under a real clock,
//! a paused test clock, or none at all.

use super::AgentKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Lifecycle state of a supervised agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Healthy and doing work
    Running,
    /// Waiting for the restart backoff
    Failed,
    /// Restart sent, waiting for the health probe
    Restarting,
    /// Terminal for the session
    Quarantined,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Running => "running",
            AgentState::Failed => "failed",
            AgentState::Restarting => "restarting",
            AgentState::Quarantined => "quarantined",
        };
        f.write_str(s)
    }
}

/// Restart and quarantine limits
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisionPolicy {
    /// Consecutive failures tolerated; one more quarantines the agent
    pub failure_limit: u32,
    /// First restart delay; doubles per failure
    pub backoff_base: Duration,
    /// Silence after which a heartbeat counts as missed
    pub heartbeat_timeout: Duration,
}

impl SupervisionPolicy {
    /// Delay before the restart that follows the `failures`-th failure
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

impl Default for SupervisionPolicy {
    fn default() -> Self {
        Self {
            failure_limit: 3,
            backoff_base: Duration::from_millis(100),
            heartbeat_timeout: Duration::from_millis(500),
        }
    }
}

/// Command the supervisor must send to an agent after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    /// Reset and answer with a health probe
    Restart,
    /// Leave rotation for the rest of the session
    Quarantine,
}

/// Health bookkeeping for one agent, owned by the supervisor
#[derive(Debug, Clone)]
pub struct AgentHealthRecord {
    /// Agent this record tracks
    pub kind: AgentKind,
    /// Lifecycle state
    pub state: AgentState,
    /// Failures since the last successful probe
    pub consecutive_failures: u32,
    /// Restarts issued so far
    pub restart_attempts: u32,
    /// Last liveness signal
    pub last_heartbeat: Instant,
    /// Deadline of the pending restart while `Failed`
    pub restart_at: Option<Instant>,
    /// Most recent failure reason
    pub last_failure: Option<String>,
}

impl AgentHealthRecord {
    /// Fresh `Running` record
    pub fn new(kind: AgentKind, now: Instant) -> Self {
        Self {
            kind,
            state: AgentState::Running,
            consecutive_failures: 0,
            restart_attempts: 0,
            last_heartbeat: now,
            restart_at: None,
            last_failure: None,
        }
    }

    /// Whether the agent is out of rotation for good
    pub fn is_quarantined(&self) -> bool {
        self.state == AgentState::Quarantined
    }

    /// Liveness signal from the agent
    pub fn heartbeat(&mut self, now: Instant) {
        if !self.is_quarantined() {
            self.last_heartbeat = now;
        }
    }

    /// A missed heartbeat, failed probe or contract failure
    ///
    /// Ignored while `Failed` (a restart is already pending) or `Quarantined`.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        now: Instant,
        policy: &SupervisionPolicy,
    ) -> Option<Directive> {
        if !matches!(self.state, AgentState::Running | AgentState::Restarting) {
            return None;
        }

        self.consecutive_failures += 1;
        self.last_failure = Some(reason.into());

        if self.consecutive_failures > policy.failure_limit {
            self.state = AgentState::Quarantined;
            self.restart_at = None;
            return Some(Directive::Quarantine);
        }

        self.state = AgentState::Failed;
        self.restart_at = Some(now + policy.backoff(self.consecutive_failures));
        None
    }

    /// Result of the health probe that follows a restart
    pub fn probe(
        &mut self,
        ok: bool,
        now: Instant,
        policy: &SupervisionPolicy,
    ) -> Option<Directive> {
        if self.state != AgentState::Restarting {
            return None;
        }
        if ok {
            self.state = AgentState::Running;
            self.consecutive_failures = 0;
            self.last_heartbeat = now;
            None
        } else {
            self.fail("health probe failed", now, policy)
        }
    }

    /// Advance timers: detect missed heartbeats and due restarts
    pub fn poll(&mut self, now: Instant, policy: &SupervisionPolicy) -> Option<Directive> {
        match self.state {
            AgentState::Running | AgentState::Restarting => {
                if now.saturating_duration_since(self.last_heartbeat) > policy.heartbeat_timeout {
                    // Each timeout window counts once.
                    self.last_heartbeat = now;
                    self.fail("heartbeat missed", now, policy)
                } else {
                    None
                }
            }
            AgentState::Failed => match self.restart_at {
                Some(deadline) if now >= deadline => {
                    self.state = AgentState::Restarting;
                    self.restart_attempts += 1;
                    self.restart_at = None;
                    self.last_heartbeat = now;
                    Some(Directive::Restart)
                }
                _ => None,
            },
            AgentState::Quarantined => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(limit: u32) -> SupervisionPolicy {
        SupervisionPolicy {
            failure_limit: limit,
            backoff_base: Duration::from_millis(100),
            heartbeat_timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy(3);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(0), Duration::from_millis(100));
    }

    #[test]
    fn test_failure_then_restart_then_recovery() {
        let p = policy(3);
        let t0 = Instant::now();
        let mut record = AgentHealthRecord::new(AgentKind::Prediction, t0);

        assert_eq!(record.fail("policy timeout", t0, &p), None);
        assert_eq!(record.state, AgentState::Failed);
        assert_eq!(record.consecutive_failures, 1);

        // Backoff not yet elapsed.
        assert_eq!(record.poll(t0 + Duration::from_millis(50), &p), None);
        assert_eq!(
            record.poll(t0 + Duration::from_millis(100), &p),
            Some(Directive::Restart)
        );
        assert_eq!(record.state, AgentState::Restarting);
        assert_eq!(record.restart_attempts, 1);

        record.probe(true, t0 + Duration::from_millis(120), &p);
        assert_eq!(record.state, AgentState::Running);
        assert_eq!(record.consecutive_failures, 0);
    }

    #[test]
    fn test_failures_while_failed_are_ignored() {
        let p = policy(1);
        let t0 = Instant::now();
        let mut record = AgentHealthRecord::new(AgentKind::Ingestion, t0);

        record.fail("a", t0, &p);
        assert_eq!(record.fail("b", t0, &p), None);
        assert_eq!(record.consecutive_failures, 1);
        assert_eq!(record.state, AgentState::Failed);
    }

    #[test]
    fn test_four_missed_heartbeats_quarantine_with_budget_three() {
        let p = policy(3);
        let t0 = Instant::now();
        let mut record = AgentHealthRecord::new(AgentKind::Preprocess, t0);
        let mut now = t0;
        let mut last = None;

        for miss in 1..=4 {
            now += p.heartbeat_timeout + Duration::from_millis(1);
            last = record.poll(now, &p);
            if miss < 4 {
                assert_eq!(record.state, AgentState::Failed, "miss {miss}");
                now += p.backoff(record.consecutive_failures);
                assert_eq!(record.poll(now, &p), Some(Directive::Restart));
            }
        }

        assert_eq!(last, Some(Directive::Quarantine));
        assert!(record.is_quarantined());
        assert_eq!(record.consecutive_failures, 4);
        assert_eq!(record.restart_attempts, 3);

        // Terminal.
        assert_eq!(record.poll(now + Duration::from_secs(60), &p), None);
        assert_eq!(record.probe(true, now, &p), None);
        assert!(record.is_quarantined());
    }

    #[test]
    fn test_failed_probe_counts() {
        let p = policy(3);
        let t0 = Instant::now();
        let mut record = AgentHealthRecord::new(AgentKind::Prediction, t0);

        record.fail("x", t0, &p);
        record.poll(t0 + p.backoff(1), &p);
        assert_eq!(record.probe(false, t0 + p.backoff(1), &p), None);
        assert_eq!(record.state, AgentState::Failed);
        assert_eq!(record.consecutive_failures, 2);
        assert_eq!(record.restart_at, Some(t0 + p.backoff(1) + p.backoff(2)));
    }

    #[test]
    fn test_zero_limit_quarantines_on_first_failure() {
        let p = policy(0);
        let t0 = Instant::now();
        let mut record = AgentHealthRecord::new(AgentKind::Ingestion, t0);
        assert_eq!(record.fail("boom", t0, &p), Some(Directive::Quarantine));
    }
}
