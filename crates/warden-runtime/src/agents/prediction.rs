//! Prediction agent: observations -> validated action candidates
//!
//! Policy calls run concurrently up to the in-flight limit; completion order
//! is arbitrary and restored by the decision stage.

use super::{heartbeat_ticker, send_with_heartbeat};
use crate::messages::{AgentCommand, AgentLink, Predicted, Staged};
use crate::policy::Policy;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{error::Elapsed, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::prediction::Prediction;
use warden_core::types::PolicyOutput;
use warden_core::{DecisionEngine, Observation, StageError};

enum Completed {
    Call {
        sequence: u64,
        observation: Observation,
        result: Result<anyhow::Result<PolicyOutput>, Elapsed>,
    },
    Probe(bool),
}

pub struct PredictionAgent {
    link: AgentLink,
    engine: Arc<DecisionEngine>,
    policy: Arc<dyn Policy>,
    input: mpsc::Receiver<Staged<Observation>>,
    output: mpsc::Sender<Staged<Predicted>>,
    policy_timeout: Duration,
    heartbeat_interval: Duration,
    max_inflight: usize,
    quarantined: bool,
}

impl PredictionAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        link: AgentLink,
        engine: Arc<DecisionEngine>,
        policy: Arc<dyn Policy>,
        input: mpsc::Receiver<Staged<Observation>>,
        output: mpsc::Sender<Staged<Predicted>>,
        policy_timeout: Duration,
        heartbeat_interval: Duration,
        max_inflight: usize,
    ) -> Self {
        Self {
            link,
            engine,
            policy,
            input,
            output,
            policy_timeout,
            heartbeat_interval,
            max_inflight: max_inflight.max(1),
            quarantined: false,
        }
    }

    fn call(&self, sequence: u64, observation: Observation) -> BoxFuture<'static, Completed> {
        let policy = self.policy.clone();
        let limit = self.policy_timeout;
        async move {
            let result = timeout(limit, policy.evaluate(&observation.features)).await;
            Completed::Call {
                sequence,
                observation,
                result,
            }
        }
        .boxed()
    }

    fn probe(&self) -> BoxFuture<'static, Completed> {
        let policy = self.policy.clone();
        let limit = self.policy_timeout;
        async move { Completed::Probe(matches!(timeout(limit, policy.probe()).await, Ok(Ok(())))) }
            .boxed()
    }

    /// Resolve a finished policy call into a prediction
    ///
    /// Errors and timeouts are reported to the supervisor and fall back to hover.
    fn resolve(
        &self,
        sequence: u64,
        observation: &Observation,
        result: Result<anyhow::Result<PolicyOutput>, Elapsed>,
    ) -> Prediction {
        let features = observation.features;
        let error = match result {
            Ok(Ok(output)) => {
                let prediction = self.engine.predict(features, &output);
                if let Some(error) = &prediction.error {
                    warn!(sequence, %error, "policy output rejected");
                } else {
                    debug!(sequence, action = %prediction.candidate.action, "candidate ready");
                }
                return prediction;
            }
            Ok(Err(e)) => StageError::PolicyFailed(e.to_string()),
            Err(_) => StageError::PolicyCallTimeout {
                timeout_ms: self.policy_timeout.as_millis() as u64,
            },
        };

        warn!(sequence, policy = self.policy.name(), %error, "policy call failed");
        self.link.fail(error.to_string());
        Prediction::failed(features, error)
    }

    fn accept(
        &self,
        staged: Staged<Observation>,
        inflight: &mut FuturesUnordered<BoxFuture<'static, Completed>>,
    ) -> Option<Staged<Predicted>> {
        match staged.forward() {
            Ok(forwarded) => Some(forwarded),
            Err((sequence, observation)) if self.quarantined || !self.link.is_routed() => {
                Some(Staged::Degraded {
                    sequence,
                    observation: Some(observation),
                    reason: "prediction quarantined".to_string(),
                })
            }
            Err((sequence, observation)) => {
                inflight.push(self.call(sequence, observation));
                None
            }
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = heartbeat_ticker(self.heartbeat_interval);
        let mut inflight: FuturesUnordered<BoxFuture<'static, Completed>> = FuturesUnordered::new();
        let mut input_open = true;

        while input_open || !inflight.is_empty() {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(command) = self.link.commands.recv() => {
                    match command {
                        AgentCommand::Restart => {
                            info!("restarting prediction, probing policy");
                            inflight.push(self.probe());
                        }
                        AgentCommand::Quarantine => {
                            warn!("prediction quarantined, features take the degraded path");
                            self.quarantined = true;
                        }
                    }
                    continue;
                }
                _ = ticker.tick() => {
                    if !self.quarantined {
                        self.link.heartbeat();
                    }
                    continue;
                }
                Some(done) = inflight.next(), if !inflight.is_empty() => match done {
                    Completed::Call { sequence, observation, result } => {
                        let prediction = self.resolve(sequence, &observation, result);
                        Staged::Ready {
                            sequence,
                            payload: Predicted::new(prediction, &observation),
                        }
                    }
                    Completed::Probe(ok) => {
                        debug!(ok, "policy probe finished");
                        self.link.probe(ok);
                        continue;
                    }
                },
                staged = self.input.recv(), if input_open && inflight.len() < self.max_inflight => {
                    match staged {
                        Some(staged) => match self.accept(staged, &mut inflight) {
                            Some(item) => item,
                            None => continue,
                        },
                        None => {
                            input_open = false;
                            continue;
                        }
                    }
                }
            };

            if !send_with_heartbeat(&self.output, item, &self.link, &mut ticker, &cancel).await {
                break;
            }
        }

        if !self.quarantined {
            self.link.retire();
        }
        debug!("prediction stopped");
    }
}
