//! Client-side tracking of a workflow run's live progress.
//!
//! [`ExecutionTracker`] owns the websocket for one run at a time, keeps it
//! alive with periodic pings, reconnects with exponential backoff when it
//! drops, and folds decoded events into an injected [`ExecutionStore`].

pub mod backoff;
pub mod error;
pub mod launcher;
pub mod store;
pub mod tracker;
pub mod transport;

pub use backoff::{Backoff, ReconnectPolicy};
pub use error::{TrackerError, TransportError};
pub use launcher::{HttpRunLauncher, RunLauncher};
pub use store::{ExecutionSnapshot, ExecutionStore, SharedExecutionStore};
pub use tracker::{ExecutionTracker, SessionInfo, SessionPhase, TrackerEvent, TrackerOptions};
pub use transport::{FrameConnection, FrameTransport, WsTransport};
