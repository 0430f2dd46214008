//! Decision stage: scoring, safety review and in-order delivery
//!
//! Items are buffered until every earlier sequence number is resolved, then
//! decided in sequence order so the last-known-good action is well defined.

use crate::messages::{Predicted, Staged};
use crate::reorder::{ReorderBuffer, Slot};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::integrity::IntegrityStats;
use warden_core::safety::ReviewContext;
use warden_core::types::{Action, Decision};
use warden_core::{DecisionEngine, DegradedMode, Observation};

pub struct DecisionStage {
    engine: Arc<DecisionEngine>,
    stats: Arc<IntegrityStats>,
    mode: DegradedMode,
    input: mpsc::Receiver<Staged<Predicted>>,
    evictions: mpsc::UnboundedReceiver<u64>,
    output: mpsc::Sender<Decision>,
    buffer: ReorderBuffer<Staged<Predicted>>,
    last_good: Option<Action>,
    consumer_gone: bool,
}

/// What to do after deciding one item
enum Flow {
    Continue,
    Halt,
}

impl DecisionStage {
    pub fn new(
        engine: Arc<DecisionEngine>,
        stats: Arc<IntegrityStats>,
        mode: DegradedMode,
        input: mpsc::Receiver<Staged<Predicted>>,
        evictions: mpsc::UnboundedReceiver<u64>,
        output: mpsc::Sender<Decision>,
    ) -> Self {
        Self {
            engine,
            stats,
            mode,
            input,
            evictions,
            output,
            buffer: ReorderBuffer::new(0),
            last_good: None,
            consumer_gone: false,
        }
    }

    fn accept(&mut self, staged: Staged<Predicted>) {
        let sequence = staged.sequence();
        let fresh = match staged {
            Staged::Dropped { sequence } => self.buffer.drop_sequence(sequence),
            other => self.buffer.insert(sequence, other),
        };
        if !fresh {
            warn!(sequence, "duplicate or late sequence number ignored");
        }
    }

    fn evicted(&mut self, sequence: u64) {
        if !self.buffer.drop_sequence(sequence) {
            warn!(sequence, "eviction for an already resolved sequence number");
        }
    }

    /// Score and review a candidate, recording the step
    pub fn decide(&mut self, sequence: u64, predicted: Predicted) -> Decision {
        let context = predicted.review_context(sequence);
        let prediction = predicted.prediction;
        let reviewed = self.engine.decide(&prediction.candidate, &context);

        let mut assessment = prediction.assessment;
        assessment.extend(reviewed.assessment);
        self.stats.record_step(assessment.issues());

        let decision = reviewed.decision;
        if let Some(rule) = decision.veto_rule {
            warn!(sequence, %rule, proposed = ?decision.proposed, "action vetoed");
        } else if !prediction.candidate.fallback {
            self.last_good = Some(decision.action);
        }
        decision
    }

    /// Decision for an item whose stage is out of rotation
    pub fn decide_degraded(
        &mut self,
        sequence: u64,
        observation: Option<Observation>,
        reason: &str,
    ) -> (Decision, bool) {
        let context = observation
            .as_ref()
            .map_or_else(|| ReviewContext::new(sequence), |o| o.review_context(sequence));
        let features = observation.map(|o| o.features);
        let (reviewed, halt) = match self.mode {
            DegradedMode::LastKnownGood => {
                let action = self.last_good.unwrap_or(Action::Hover);
                (self.engine.decide_degraded(action, features, &context, reason), false)
            }
            DegradedMode::Hover => (
                self.engine.decide_degraded(Action::Hover, features, &context, reason),
                false,
            ),
            DegradedMode::Halt => (self.engine.decide_degraded(Action::Hover, None, &context, reason), true),
        };

        self.stats.record_step(reviewed.assessment.issues());
        warn!(sequence, reason, action = %reviewed.decision.action, "degraded decision");
        (reviewed.decision, halt)
    }

    async fn deliver(&mut self, decision: Decision, cancel: &CancellationToken) {
        if self.consumer_gone {
            return;
        }
        debug!(sequence = decision.sequence, action = %decision.action, "decision");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            result = self.output.send(decision) => {
                if result.is_err() {
                    debug!("decision consumer gone");
                    self.consumer_gone = true;
                }
            }
        }
    }

    async fn release(&mut self, cancel: &CancellationToken) -> Flow {
        for (sequence, slot) in self.buffer.drain_ready() {
            let (decision, halt) = match slot {
                Slot::Dropped => {
                    debug!(sequence, "sequence dropped upstream");
                    continue;
                }
                Slot::Ready(Staged::Ready { payload, .. }) => (self.decide(sequence, payload), false),
                Slot::Ready(Staged::Degraded {
                    observation, reason, ..
                }) => self.decide_degraded(sequence, observation, &reason),
                Slot::Ready(Staged::Dropped { .. }) => continue,
            };

            self.deliver(decision, cancel).await;
            if halt {
                return Flow::Halt;
            }
        }
        Flow::Continue
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(sequence) = self.evictions.recv() => self.evicted(sequence),
                staged = self.input.recv() => match staged {
                    Some(staged) => self.accept(staged),
                    None => {
                        while let Ok(sequence) = self.evictions.try_recv() {
                            self.evicted(sequence);
                        }
                        if let Flow::Halt = self.release(&cancel).await {
                            cancel.cancel();
                        }
                        break;
                    }
                },
            }

            if let Flow::Halt = self.release(&cancel).await {
                warn!("pipeline halted by degraded mode");
                cancel.cancel();
                break;
            }
        }

        if self.buffer.pending() > 0 {
            debug!(pending = self.buffer.pending(), "unresolved items discarded");
        }
        info!(next_sequence = self.buffer.next_sequence(), "decision stage stopped");
    }
}
