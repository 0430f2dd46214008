//! Ingestion agent: sensor source -> sequenced samples -> drop-oldest queue
//!
//! After a restart the agent answers with a probe only once the source has
//! spoken: the next frame is a passing probe, an error or another silent
//! `sensor_timeout` a failing one.

use super::heartbeat_ticker;
use crate::messages::{AgentCommand, AgentLink};
use crate::queue::SampleQueue;
use crate::sensor::SensorSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::integrity::{IntegrityStats, Verdict};
use warden_core::types::{now, RawFrame, SensorSample};
use warden_core::StageError;

/// Pulls frames, assigns sequence numbers and feeds the sample queue
pub struct IngestionAgent {
    link: AgentLink,
    source: Box<dyn SensorSource>,
    queue: Arc<SampleQueue>,
    /// Sequence numbers evicted from the queue, for the reorder buffer
    evictions: mpsc::UnboundedSender<u64>,
    stats: Arc<IntegrityStats>,
    sensor_timeout: Duration,
    /// Minimum spacing between pulls; `None` lets the source set the pace
    frame_period: Option<Duration>,
    heartbeat_interval: Duration,
    next_sequence: u64,
}

/// Completes on the next pacing tick, never without a pacer
async fn pace(pacer: &mut Option<Interval>) {
    match pacer {
        Some(pacer) => {
            pacer.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl IngestionAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        link: AgentLink,
        source: Box<dyn SensorSource>,
        queue: Arc<SampleQueue>,
        evictions: mpsc::UnboundedSender<u64>,
        stats: Arc<IntegrityStats>,
        sensor_timeout: Duration,
        frame_period: Option<Duration>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            link,
            source,
            queue,
            evictions,
            stats,
            sensor_timeout,
            frame_period,
            heartbeat_interval,
            next_sequence: 0,
        }
    }

    /// Stamp a frame with the next sequence number
    pub fn ingest(&mut self, frame: RawFrame) -> SensorSample {
        let sample = SensorSample {
            sequence: self.next_sequence,
            received_at: now(),
            frame,
        };
        self.next_sequence += 1;
        sample
    }

    fn enqueue(&mut self, frame: RawFrame) {
        let sample = self.ingest(frame);
        let sequence = sample.sequence;
        debug!(sequence, "sample ingested");

        if let Some(evicted) = self.queue.push(sample) {
            let verdict = Verdict::drift(
                "queue",
                format!("sample {} evicted by sample {}", evicted.sequence, sequence),
            );
            warn!(evicted = evicted.sequence, "ingestion queue full, oldest sample dropped");
            self.stats.record_dropped([&verdict]);
            let _ = self.evictions.send(evicted.sequence);
        }
    }

    /// A silent sensor or a source error
    ///
    /// While a restart awaits its probe this is the failed probe itself.
    fn report(&self, reason: String, probing: &mut bool) {
        if std::mem::take(probing) {
            warn!(%reason, "ingestion probe failed");
            self.link.probe(false);
        } else {
            self.link.fail(reason);
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = heartbeat_ticker(self.heartbeat_interval);
        let mut pacer = self.frame_period.map(|period| {
            let mut pacer = interval(period);
            pacer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            pacer
        });
        let mut due = pacer.is_none();
        let mut frame_deadline = Instant::now() + self.sensor_timeout;
        let mut probing = false;
        let mut quarantined = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(command) = self.link.commands.recv() => match command {
                    AgentCommand::Restart => {
                        info!("restarting ingestion, waiting for the next frame");
                        frame_deadline = Instant::now() + self.sensor_timeout;
                        probing = true;
                    }
                    AgentCommand::Quarantine => {
                        // No trustworthy input without ingestion: halt.
                        warn!("ingestion quarantined, halting input");
                        quarantined = true;
                        break;
                    }
                },
                _ = ticker.tick() => self.link.heartbeat(),
                _ = sleep_until(frame_deadline) => {
                    let error = StageError::SensorTimeout {
                        timeout_ms: self.sensor_timeout.as_millis() as u64,
                    };
                    warn!(%error, "no sensor frame");
                    self.report(error.to_string(), &mut probing);
                    frame_deadline = Instant::now() + self.sensor_timeout;
                }
                _ = pace(&mut pacer), if !due => due = true,
                result = self.source.next_frame(), if due => {
                    frame_deadline = Instant::now() + self.sensor_timeout;
                    due = pacer.is_none();
                    match result {
                        Ok(Some(frame)) => {
                            if std::mem::take(&mut probing) {
                                info!("sensor frames resumed");
                                self.link.probe(true);
                            }
                            self.enqueue(frame);
                        }
                        Ok(None) => {
                            info!(samples = self.next_sequence, "sensor source closed");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "sensor source error");
                            self.report(format!("sensor source error: {e}"), &mut probing);
                        }
                    }
                }
            }
        }

        self.queue.close();
        if !quarantined {
            self.link.retire();
        }
    }
}

impl std::fmt::Debug for IngestionAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionAgent")
            .field("next_sequence", &self.next_sequence)
            .field("queue_len", &self.queue.len())
            .field("frame_period", &self.frame_period)
            .finish()
    }
}
