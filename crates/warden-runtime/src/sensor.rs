//! Sensor boundary

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use warden_core::types::{now, RawFrame};

/// Async source of raw frames
///
/// `Ok(None)` means the source is exhausted and ingestion should stop.
/// Implementations must be cancel safe: a `next_frame` future dropped before
/// completion must not lose a frame.
#[async_trait]
pub trait SensorSource: Send {
    async fn next_frame(&mut self) -> Result<Option<RawFrame>>;
}

/// One step of a scripted source
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Frame(RawFrame),
    /// Stay silent for this long before the next step
    Pause(Duration),
    /// Report a source error
    Error(String),
}

/// Replays a fixed script of frames, pauses and errors
///
/// By default each frame is restamped with the emission time so that
/// staleness reflects the replay, not the moment the script was built.
#[derive(Debug)]
pub struct ScriptedSource {
    steps: VecDeque<ScriptStep>,
    interval: Duration,
    restamp: bool,
    due: Option<Instant>,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = RawFrame>) -> Self {
        Self::from_steps(frames.into_iter().map(ScriptStep::Frame))
    }

    pub fn from_steps(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            interval: Duration::ZERO,
            restamp: true,
            due: None,
        }
    }

    /// Delay before every step
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Keep the scripted capture timestamps
    pub fn keep_timestamps(mut self) -> Self {
        self.restamp = false;
        self
    }

    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

#[async_trait]
impl SensorSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        loop {
            // The deadline survives cancellation, so a dropped call resumes
            // the same wait instead of starting a new one.
            let interval = self.interval;
            let due = *self.due.get_or_insert_with(|| Instant::now() + interval);
            sleep_until(due).await;

            let Some(step) = self.steps.front().cloned() else {
                return Ok(None);
            };

            match step {
                ScriptStep::Pause(pause) => {
                    self.steps.pop_front();
                    self.due = Some(due + pause);
                }
                ScriptStep::Error(message) => {
                    self.steps.pop_front();
                    self.due = None;
                    return Err(anyhow!(message));
                }
                ScriptStep::Frame(mut frame) => {
                    self.steps.pop_front();
                    self.due = None;
                    if self.restamp {
                        frame.captured_at = now();
                    }
                    return Ok(Some(frame));
                }
            }
        }
    }
}

/// Frames pushed by another task
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<RawFrame>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<RawFrame>) -> Self {
        Self { rx }
    }

    /// A source plus the sender that feeds it
    pub fn channel(capacity: usize) -> (mpsc::Sender<RawFrame>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl SensorSource for ChannelSource {
    async fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        Ok(self.rx.recv().await)
    }
}
