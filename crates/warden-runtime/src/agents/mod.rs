//! Pipeline stages
//!
//! Ingestion, preprocess and prediction are supervised agents: they send
//! heartbeats, report contract failures and obey restart / quarantine
//! commands. The decision stage is unsupervised and owns output ordering.

pub mod decision;
pub mod ingestion;
pub mod preprocess;
pub mod prediction;

pub use decision::DecisionStage;
pub use ingestion::IngestionAgent;
pub use preprocess::PreprocessAgent;
pub use prediction::PredictionAgent;

use crate::messages::AgentLink;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub(crate) fn heartbeat_ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Blocking send that keeps heartbeating while downstream applies backpressure
///
/// Returns `false` when cancelled or the receiver is gone.
pub(crate) async fn send_with_heartbeat<T>(
    output: &mpsc::Sender<T>,
    item: T,
    link: &AgentLink,
    ticker: &mut Interval,
    cancel: &CancellationToken,
) -> bool {
    let send = output.send(item);
    tokio::pin!(send);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            result = &mut send => return result.is_ok(),
            _ = ticker.tick() => link.heartbeat(),
        }
    }
}
