//! Integrity Stats - per-session drift/hallucination counters
//!
//! Counters are atomics so that every stage can record through a shared
//! reference. One call to [`IntegrityStats::record_step`] accounts for one
//! sample: at most one drift and at most one hallucination per step, counted
//! independently.

use super::validator::{Classification, Verdict};
use crate::types::{now, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// What kind of run the counters belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Training episode
    Training,
    /// Live inference
    Inference,
}

impl SessionKind {
    fn label(self) -> &'static str {
        match self {
            SessionKind::Training => "Training",
            SessionKind::Inference => "Inference",
        }
    }
}

/// Snapshot of the counters with derived fractions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Session kind
    pub kind: SessionKind,
    /// Steps recorded, dropped ones included
    pub total_steps: u64,
    /// Steps with at least one Drift verdict
    pub drift_count: u64,
    /// Steps with at least one Hallucination verdict
    pub hallucination_count: u64,
    /// Steps that never reached a decision
    pub dropped_samples: u64,
    /// `drift_count / total_steps` (0 when no steps)
    pub drift_pct: f64,
    /// `hallucination_count / total_steps` (0 when no steps)
    pub hallucination_pct: f64,
    /// Start of the counting window
    pub since: Timestamp,
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = format!("[{} Integrity Report]", self.kind.label());
        if self.total_steps == 0 {
            return write!(f, "{prefix} No steps recorded.");
        }
        writeln!(f, "{prefix} Steps={}", self.total_steps)?;
        writeln!(
            f,
            "  - Drift errors: {} ({:.2}% of steps)",
            self.drift_count,
            self.drift_pct * 100.0
        )?;
        writeln!(
            f,
            "  - Hallucination errors: {} ({:.2}% of steps)",
            self.hallucination_count,
            self.hallucination_pct * 100.0
        )?;
        write!(f, "  - Dropped samples: {}", self.dropped_samples)
    }
}

/// Session-scoped integrity counters
#[derive(Debug)]
pub struct IntegrityStats {
    kind: SessionKind,
    total_steps: AtomicU64,
    drift_count: AtomicU64,
    hallucination_count: AtomicU64,
    dropped_samples: AtomicU64,
    since: Mutex<Timestamp>,
}

impl IntegrityStats {
    /// Zeroed counters for a session of `kind`
    pub fn new(kind: SessionKind) -> Self {
        Self {
            kind,
            total_steps: AtomicU64::new(0),
            drift_count: AtomicU64::new(0),
            hallucination_count: AtomicU64::new(0),
            dropped_samples: AtomicU64::new(0),
            since: Mutex::new(now()),
        }
    }

    /// Session kind
    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Record one completed step and the verdicts gathered along the way
    pub fn record_step<'a, I>(&self, verdicts: I)
    where
        I: IntoIterator<Item = &'a Verdict>,
    {
        let mut drift = false;
        let mut hallucination = false;
        for verdict in verdicts {
            match verdict.classification {
                Classification::Drift => drift = true,
                Classification::Hallucination => hallucination = true,
                Classification::Ok => {}
            }
        }

        // Steps are counted before their flags so a concurrent report never
        // sees more events than steps.
        self.total_steps.fetch_add(1, Ordering::SeqCst);
        if drift {
            self.drift_count.fetch_add(1, Ordering::SeqCst);
        }
        if hallucination {
            self.hallucination_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Record a step whose sample left the pipeline without a decision
    pub fn record_dropped<'a, I>(&self, verdicts: I)
    where
        I: IntoIterator<Item = &'a Verdict>,
    {
        self.record_step(verdicts);
        self.dropped_samples.fetch_add(1, Ordering::SeqCst);
    }

    /// Steps recorded so far
    pub fn total_steps(&self) -> u64 {
        self.total_steps.load(Ordering::SeqCst)
    }

    /// Snapshot the counters
    pub fn report(&self) -> IntegrityReport {
        let drift_count = self.drift_count.load(Ordering::SeqCst);
        let hallucination_count = self.hallucination_count.load(Ordering::SeqCst);
        let dropped_samples = self.dropped_samples.load(Ordering::SeqCst);
        let total_steps = self.total_steps.load(Ordering::SeqCst);

        let (drift_pct, hallucination_pct) = if total_steps == 0 {
            (0.0, 0.0)
        } else {
            (
                drift_count as f64 / total_steps as f64,
                hallucination_count as f64 / total_steps as f64,
            )
        };

        IntegrityReport {
            kind: self.kind,
            total_steps,
            drift_count,
            hallucination_count,
            dropped_samples,
            drift_pct,
            hallucination_pct,
            since: *self.since.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Zero every counter; only called at a session boundary
    pub fn reset(&self) {
        self.total_steps.store(0, Ordering::SeqCst);
        self.drift_count.store(0, Ordering::SeqCst);
        self.hallucination_count.store(0, Ordering::SeqCst);
        self.dropped_samples.store(0, Ordering::SeqCst);
        *self.since.lock().unwrap_or_else(|e| e.into_inner()) = now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_report() {
        let stats = IntegrityStats::new(SessionKind::Inference);
        let report = stats.report();
        assert_eq!(report.total_steps, 0);
        assert_eq!(report.drift_pct, 0.0);
        assert!(report.to_string().contains("No steps recorded"));
    }

    #[test]
    fn test_step_with_both_categories() {
        let stats = IntegrityStats::new(SessionKind::Training);
        let verdicts = vec![
            Verdict::drift("energy", "1.3 outside [0, 1]"),
            Verdict::drift("proximity", "-0.1 outside [0, 1]"),
            Verdict::hallucination("action", "index 9"),
        ];
        stats.record_step(&verdicts);
        stats.record_step(&[]);

        let report = stats.report();
        assert_eq!(report.total_steps, 2);
        assert_eq!(report.drift_count, 1);
        assert_eq!(report.hallucination_count, 1);
        assert_eq!(report.drift_pct, 0.5);
        assert_eq!(report.hallucination_pct, 0.5);
        assert!(report.to_string().starts_with("[Training Integrity Report] Steps=2"));
    }

    #[test]
    fn test_dropped_counts_as_step() {
        let stats = IntegrityStats::new(SessionKind::Inference);
        stats.record_dropped(&[Verdict::drift("queue", "evicted")]);
        let report = stats.report();
        assert_eq!(report.total_steps, 1);
        assert_eq!(report.dropped_samples, 1);
        assert_eq!(report.drift_count, 1);
    }

    #[test]
    fn test_reset() {
        let stats = IntegrityStats::new(SessionKind::Inference);
        stats.record_step(&[Verdict::hallucination("action", "bad")]);
        stats.reset();
        let report = stats.report();
        assert_eq!(report.total_steps, 0);
        assert_eq!(report.hallucination_count, 0);
    }

    proptest! {
        #[test]
        fn prop_percentages_are_exact(steps in prop::collection::vec((any::<bool>(), any::<bool>()), 1..200)) {
            let stats = IntegrityStats::new(SessionKind::Inference);
            let mut d = 0u64;
            let mut h = 0u64;
            for (drift, hallucination) in &steps {
                let mut verdicts = Vec::new();
                if *drift {
                    d += 1;
                    verdicts.push(Verdict::drift("x", "drift"));
                }
                if *hallucination {
                    h += 1;
                    verdicts.push(Verdict::hallucination("y", "hallucination"));
                }
                stats.record_step(&verdicts);
            }
            let n = steps.len() as u64;
            let report = stats.report();
            prop_assert_eq!(report.total_steps, n);
            prop_assert_eq!(report.drift_pct, d as f64 / n as f64);
            prop_assert_eq!(report.hallucination_pct, h as f64 / n as f64);
            prop_assert!(report.drift_count <= report.total_steps);
            prop_assert!(report.hallucination_count <= report.total_steps);
        }
    }
}
