//! Session lifecycle: validate, wire, spawn, shut down
//!
//! ```text
//! source -> Ingestion -[drop-oldest queue]-> Preprocess -[mpsc]-> Prediction
//!        -[mpsc]-> Decision stage -[mpsc]-> consumer
//!                       ^ evictions
//! Supervisor <-heartbeats/control- agents, -commands-> agents, -routing watch-> agents
//! ```

use crate::agents::{DecisionStage, IngestionAgent, PredictionAgent, PreprocessAgent};
use crate::messages::AgentLink;
use crate::policy::Policy;
use crate::queue::SampleQueue;
use crate::sensor::SensorSource;
use crate::supervisor::Supervisor;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;
use warden_core::error::ResultExt;
use warden_core::integrity::{IntegrityReport, IntegrityStats, SessionKind};
use warden_core::supervision::{AgentHealthSnapshot, HealthBoard, Routing};
use warden_core::types::{Decision, Timestamp};
use warden_core::{AgentKind, DecisionEngine, SessionConfig, WardenError};

const HEARTBEAT_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 8;

/// A running pipeline
///
/// Dropping a session without calling [`Session::end`] cancels its tasks but
/// does not wait for them.
pub struct Session {
    id: Uuid,
    kind: SessionKind,
    config: SessionConfig,
    started_at: Timestamp,
    stats: Arc<IntegrityStats>,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    decisions: Option<mpsc::Receiver<Decision>>,
    routing: watch::Receiver<Routing>,
    health: watch::Receiver<Vec<AgentHealthSnapshot>>,
    span: Span,
}

impl Session {
    /// Validate `config` and spawn every stage on the current Tokio runtime
    pub fn start(
        config: SessionConfig,
        kind: SessionKind,
        policy: Arc<dyn Policy>,
        source: Box<dyn SensorSource>,
    ) -> warden_core::Result<Self> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| WardenError::Session(format!("no Tokio runtime: {e}")))?;

        let engine = DecisionEngine::from_config(&config)
            .map_err(WardenError::from)
            .context("Refusing to start session")?;
        let engine = Arc::new(engine);

        let id = Uuid::new_v4();
        let span = info_span!("session", %id, ?kind);
        let stats = Arc::new(IntegrityStats::new(kind));
        stats.reset();
        let cancel = CancellationToken::new();

        let board = HealthBoard::new(config.supervision_policy(), tokio::time::Instant::now().into_std());
        let (routing_tx, routing_rx) = watch::channel(board.routing());
        let (health_tx, health_rx) = watch::channel(board.snapshot());
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(HEARTBEAT_CAPACITY);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let mut commands = BTreeMap::new();
        let mut links = BTreeMap::new();
        for kind in AgentKind::ALL {
            let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
            commands.insert(kind, command_tx);
            links.insert(
                kind,
                AgentLink::new(
                    kind,
                    heartbeat_tx.clone(),
                    control_tx.clone(),
                    command_rx,
                    routing_rx.clone(),
                ),
            );
        }
        drop((heartbeat_tx, control_tx));

        let capacity = config.queue_capacity;
        let queue = Arc::new(SampleQueue::new(capacity));
        let (evictions_tx, evictions_rx) = mpsc::unbounded_channel();
        let (features_tx, features_rx) = mpsc::channel(capacity);
        let (predictions_tx, predictions_rx) = mpsc::channel(capacity);
        let (decisions_tx, decisions_rx) = mpsc::channel(capacity);

        let mut link = |kind: AgentKind| {
            links
                .remove(&kind)
                .ok_or_else(|| WardenError::Session(format!("no link for {kind}")))
        };
        let ingestion = IngestionAgent::new(
            link(AgentKind::Ingestion)?,
            source,
            queue.clone(),
            evictions_tx,
            stats.clone(),
            config.sensor_timeout(),
            config.frame_period(),
            config.heartbeat_interval(),
        );
        let preprocess = PreprocessAgent::new(
            link(AgentKind::Preprocess)?,
            engine.clone(),
            queue,
            features_tx,
            stats.clone(),
            config.heartbeat_interval(),
        );
        let prediction = PredictionAgent::new(
            link(AgentKind::Prediction)?,
            engine.clone(),
            policy.clone(),
            features_rx,
            predictions_tx,
            config.policy_timeout(),
            config.heartbeat_interval(),
            config.max_inflight_predictions,
        );
        let decision = DecisionStage::new(
            engine,
            stats.clone(),
            config.degraded_mode,
            predictions_rx,
            evictions_rx,
            decisions_tx,
        );
        let supervisor = Supervisor::new(
            board,
            heartbeat_rx,
            control_rx,
            commands,
            routing_tx,
            health_tx,
            config.health_check_interval(),
        );

        let agent_span = |kind: AgentKind| info_span!(parent: &span, "agent", agent = %kind);
        let tasks = vec![
            (
                "supervisor",
                tokio::spawn(supervisor.run(cancel.clone()).instrument(info_span!(parent: &span, "supervisor"))),
            ),
            (
                "ingestion",
                tokio::spawn(ingestion.run(cancel.clone()).instrument(agent_span(AgentKind::Ingestion))),
            ),
            (
                "preprocess",
                tokio::spawn(preprocess.run(cancel.clone()).instrument(agent_span(AgentKind::Preprocess))),
            ),
            (
                "prediction",
                tokio::spawn(prediction.run(cancel.clone()).instrument(agent_span(AgentKind::Prediction))),
            ),
            (
                "decision",
                tokio::spawn(decision.run(cancel.clone()).instrument(info_span!(parent: &span, "decision"))),
            ),
        ];

        span.in_scope(|| {
            info!(
                policy = policy.name(),
                queue_capacity = capacity,
                degraded_mode = ?config.degraded_mode,
                "session started"
            )
        });

        Ok(Self {
            id,
            kind,
            config,
            started_at: stats.report().since,
            stats,
            cancel,
            tasks,
            decisions: Some(decisions_rx),
            routing: routing_rx,
            health: health_rx,
            span,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Take the decision stream; `None` if it was already taken
    pub fn decisions(&mut self) -> Option<mpsc::Receiver<Decision>> {
        self.decisions.take()
    }

    /// Next decision in sequence order
    ///
    /// `None` once the pipeline has drained or the stream was taken.
    pub async fn next_decision(&mut self) -> Option<Decision> {
        self.decisions.as_mut()?.recv().await
    }

    /// Current per-agent health, as last published by the supervisor
    pub fn health(&self) -> Vec<AgentHealthSnapshot> {
        self.health.borrow().clone()
    }

    pub fn routing(&self) -> Routing {
        self.routing.borrow().clone()
    }

    /// Counters so far; the session keeps running
    pub fn report(&self) -> IntegrityReport {
        self.stats.report()
    }

    /// Whether cancellation was requested (by `end` or a halt)
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel every stage, wait up to the shutdown grace period and report
    pub async fn end(mut self) -> IntegrityReport {
        let span = self.span.clone();
        async {
            self.cancel.cancel();
            let grace = self.config.shutdown_grace();
            let mut tasks = std::mem::take(&mut self.tasks);

            let joined = tokio::time::timeout(grace, async {
                for (_, task) in tasks.iter_mut() {
                    let _ = task.await;
                }
            })
            .await;

            if joined.is_err() {
                for (name, task) in &tasks {
                    if !task.is_finished() {
                        warn!(task = name, "task still running after grace period, aborting");
                        task.abort();
                    }
                }
            }

            let report = self.stats.report();
            info!(
                steps = report.total_steps,
                drift = report.drift_count,
                hallucination = report.hallucination_count,
                dropped = report.dropped_samples,
                "session ended"
            );
            report
        }
        .instrument(span)
        .await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
