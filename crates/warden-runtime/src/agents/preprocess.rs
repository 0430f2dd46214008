//! Preprocess agent: samples -> observations (features plus geofence distance)

use super::{heartbeat_ticker, send_with_heartbeat};
use crate::messages::{AgentCommand, AgentLink, Staged};
use crate::queue::SampleQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::integrity::IntegrityStats;
use warden_core::types::{now, SensorSample};
use warden_core::{DecisionEngine, Observation, Preprocessed};

pub struct PreprocessAgent {
    link: AgentLink,
    engine: Arc<DecisionEngine>,
    queue: Arc<SampleQueue>,
    output: mpsc::Sender<Staged<Observation>>,
    stats: Arc<IntegrityStats>,
    heartbeat_interval: Duration,
    quarantined: bool,
}

impl PreprocessAgent {
    pub fn new(
        link: AgentLink,
        engine: Arc<DecisionEngine>,
        queue: Arc<SampleQueue>,
        output: mpsc::Sender<Staged<Observation>>,
        stats: Arc<IntegrityStats>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            link,
            engine,
            queue,
            output,
            stats,
            heartbeat_interval,
            quarantined: false,
        }
    }

    /// Turn one sample into the item handed to prediction
    ///
    /// Dropped samples are recorded here, exactly once.
    pub fn handle(&self, sample: &SensorSample) -> Staged<Observation> {
        let sequence = sample.sequence;
        if self.quarantined || !self.link.is_routed() {
            return Staged::Degraded {
                sequence,
                observation: None,
                reason: "preprocess quarantined".to_string(),
            };
        }

        match self.engine.preprocess(sample, now()) {
            Preprocessed::Features(observation) => {
                debug!(
                    sequence,
                    no_fly_zone_distance = ?observation.no_fly_zone_distance,
                    "features extracted"
                );
                Staged::Ready {
                    sequence,
                    payload: observation,
                }
            }
            Preprocessed::Dropped { error, verdict } => {
                warn!(sequence, %error, "sample dropped");
                self.stats.record_dropped([&verdict]);
                Staged::Dropped { sequence }
            }
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = heartbeat_ticker(self.heartbeat_interval);

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(command) = self.link.commands.recv() => {
                    match command {
                        AgentCommand::Restart => {
                            info!("restarting preprocess");
                            self.link.probe(true);
                        }
                        AgentCommand::Quarantine => {
                            warn!("preprocess quarantined, samples take the degraded path");
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
                sample = self.queue.pop() => match sample {
                    Some(sample) => self.handle(&sample),
                    None => break,
                },
            };

            if !send_with_heartbeat(&self.output, item, &self.link, &mut ticker, &cancel).await {
                break;
            }
        }

        if !self.quarantined {
            self.link.retire();
        }
        debug!("preprocess stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::FrameBuilder;
    use tokio::sync::watch;
    use warden_core::supervision::Routing;
    use warden_core::{AgentKind, SessionConfig, SessionKind};

    fn agent(routing: Routing) -> (PreprocessAgent, watch::Sender<Routing>) {
        let (heartbeat_tx, _) = mpsc::channel(4);
        let (control_tx, _) = mpsc::unbounded_channel();
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        let (routing_tx, routing_rx) = watch::channel(routing);
        let link = AgentLink::new(AgentKind::Preprocess, heartbeat_tx, control_tx, cmd_rx, routing_rx);

        let config = SessionConfig::new().with_staleness_threshold_ms(60_000);
        let engine = Arc::new(DecisionEngine::from_config(&config).unwrap());
        let (output, _) = mpsc::channel(4);
        let agent = PreprocessAgent::new(
            link,
            engine,
            Arc::new(SampleQueue::new(4)),
            output,
            Arc::new(IntegrityStats::new(SessionKind::Inference)),
            Duration::from_millis(100),
        );
        (agent, routing_tx)
    }

    fn sample(sequence: u64) -> SensorSample {
        SensorSample {
            sequence,
            received_at: now(),
            frame: FrameBuilder::nominal().build(),
        }
    }

    #[test]
    fn test_routed_sample_becomes_observation() {
        let (agent, _routing) = agent(Routing::default());
        match agent.handle(&sample(3)) {
            Staged::Ready { sequence, payload } => {
                assert_eq!(sequence, 3);
                assert_eq!(payload.no_fly_zone_distance, None);
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn test_quarantined_preprocess_degrades_without_features() {
        let (agent, routing) = agent(Routing::default());
        routing.send_replace(Routing {
            quarantined: [AgentKind::Preprocess].into(),
        });

        assert_eq!(
            agent.handle(&sample(7)),
            Staged::Degraded {
                sequence: 7,
                observation: None,
                reason: "preprocess quarantined".to_string(),
            }
        );
    }
}
