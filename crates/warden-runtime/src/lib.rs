//! Warden Runtime - the supervised decision pipeline on Tokio
//!
//! Each stage of `warden-core` runs as its own task. A supervisor watches the
//! agents through heartbeats and failure reports, restarts them with
//! exponential backoff and quarantines the ones that keep failing; the
//! decision stage then falls back to the configured degraded mode.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use warden_runtime::{FrameBuilder, HeuristicPolicy, ScriptedSource, Session};
//! use warden_core::{SessionConfig, SessionKind};
//!
//! # async fn demo() -> warden_core::Result<()> {
//! let frames = (0..20).map(|_| FrameBuilder::nominal().build());
//! let mut session = Session::start(
//!     SessionConfig::default(),
//!     SessionKind::Inference,
//!     Arc::new(HeuristicPolicy::new()),
//!     Box::new(ScriptedSource::new(frames)),
//! )?;
//!
//! while let Some(decision) = session.next_decision().await {
//!     println!("{decision}");
//! }
//! println!("{}", session.end().await);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

pub mod agents;
pub mod frames;
pub mod messages;
pub mod policy;
pub mod queue;
pub mod reorder;
pub mod sensor;
pub mod session;
pub mod supervisor;

pub use frames::FrameBuilder;
pub use messages::{AgentCommand, AgentEvent, AgentLink, Predicted, Staged};
pub use policy::{FnPolicy, HeuristicPolicy, Policy};
pub use queue::SampleQueue;
pub use reorder::{ReorderBuffer, Slot};
pub use sensor::{ChannelSource, ScriptStep, ScriptedSource, SensorSource};
pub use session::Session;
pub use supervisor::Supervisor;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
