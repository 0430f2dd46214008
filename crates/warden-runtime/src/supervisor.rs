//! Supervisor task
//!
//! Owns the [`HealthBoard`]. Agents reach it only through the heartbeat and
//! control channels; it answers with per-agent commands and publishes routing and health
//! snapshots on watch channels. It never touches pipeline queues.

use crate::messages::{AgentCommand, AgentEvent};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::supervision::{
    AgentHealthSnapshot, AgentState, Directive, HealthBoard, HealthEvent, Routing,
};
use warden_core::AgentKind;

fn clock() -> std::time::Instant {
    Instant::now().into_std()
}

pub struct Supervisor {
    board: HealthBoard,
    heartbeats: mpsc::Receiver<AgentEvent>,
    control: mpsc::UnboundedReceiver<AgentEvent>,
    commands: BTreeMap<AgentKind, mpsc::Sender<AgentCommand>>,
    routing: watch::Sender<Routing>,
    health: watch::Sender<Vec<AgentHealthSnapshot>>,
    check_interval: Duration,
}

impl Supervisor {
    pub fn new(
        board: HealthBoard,
        heartbeats: mpsc::Receiver<AgentEvent>,
        control: mpsc::UnboundedReceiver<AgentEvent>,
        commands: BTreeMap<AgentKind, mpsc::Sender<AgentCommand>>,
        routing: watch::Sender<Routing>,
        health: watch::Sender<Vec<AgentHealthSnapshot>>,
        check_interval: Duration,
    ) -> Self {
        Self {
            board,
            heartbeats,
            control,
            commands,
            routing,
            health,
            check_interval,
        }
    }

    fn dispatch(&self, kind: AgentKind, directive: Directive) {
        match directive {
            Directive::Restart => {
                let attempts = self.board.record(kind).map_or(0, |r| r.restart_attempts);
                info!(agent = %kind, attempts, "restarting agent");
            }
            Directive::Quarantine => {
                let reason = self
                    .board
                    .record(kind)
                    .and_then(|r| r.last_failure.clone())
                    .unwrap_or_default();
                warn!(agent = %kind, %reason, "agent quarantined");
            }
        }

        if let Some(commands) = self.commands.get(&kind) {
            if let Err(e) = commands.try_send(AgentCommand::from(directive)) {
                warn!(agent = %kind, error = %e, "command not delivered");
            }
        }
    }

    fn handle(&mut self, event: AgentEvent) {
        let AgentEvent { kind, event } = event;
        let before = self.board.state(kind);
        if let HealthEvent::Failure(reason) = &event {
            debug!(agent = %kind, %reason, "failure reported");
        }

        if let Some(directive) = self.board.apply(kind, event, clock()) {
            self.dispatch(kind, directive);
        }

        let after = self.board.state(kind);
        if before != after {
            if after == Some(AgentState::Running) {
                info!(agent = %kind, "agent recovered");
            }
            self.publish();
        }
    }

    fn check(&mut self) {
        let directives = self.board.poll(clock());
        if directives.is_empty() {
            return;
        }
        for (kind, directive) in directives {
            self.dispatch(kind, directive);
        }
        self.publish();
    }

    fn publish(&self) {
        let routing = self.board.routing();
        self.routing.send_if_modified(|current| {
            if *current == routing {
                false
            } else {
                *current = routing;
                true
            }
        });
        self.health.send_replace(self.board.snapshot());
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.publish();

        let mut control_open = true;
        let mut heartbeats_open = true;
        while control_open || heartbeats_open {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = self.control.recv(), if control_open => match event {
                    Some(event) => self.handle(event),
                    None => control_open = false,
                },
                event = self.heartbeats.recv(), if heartbeats_open => match event {
                    Some(event) => self.handle(event),
                    None => heartbeats_open = false,
                },
                _ = ticker.tick() => self.check(),
            }
        }

        // Late reports still land in the final snapshot.
        while let Ok(event) = self.control.try_recv() {
            let _ = self.board.apply(event.kind, event.event, clock());
        }
        while let Ok(event) = self.heartbeats.try_recv() {
            let _ = self.board.apply(event.kind, event.event, clock());
        }
        self.publish();
        debug!("supervisor stopped");
    }
}
