//! Progress events
//!
//! The engine reports progress to an optional [`EventSink`]. Sinks must not
//! block; a missing or disconnected subscriber never affects execution.

use tokio::sync::mpsc;
use uuid::Uuid;

use super::session::{OperationResult, Summary};
use super::state::GroupState;

/// A discrete progress event
#[derive(Debug, Clone)]
pub enum Event {
    SessionStarted {
        id: Uuid,
        groups: Vec<String>,
        operations: usize,
    },
    GroupStarted {
        group: String,
    },
    OperationCompleted(Box<OperationResult>),
    GroupCompleted {
        group: String,
        state: GroupState,
        skipped: usize,
    },
    SessionFinished {
        summary: Summary,
        cancelled: bool,
    },
}

/// Receiver of progress events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: Event) {
        // The receiver may be gone (e.g., reporter finished early)
        let _ = self.tx.send(event);
    }
}
