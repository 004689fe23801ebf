//! Updates published to observers while a turn runs.
//!
//! Observers never touch the conversation state directly; they receive
//! snapshots and lifecycle notices over a bounded channel.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::conversation::ConversationState;
use crate::error::EngineError;

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream ended and no checkpoint is pending.
    Completed,
    /// The request or the stream failed.
    Failed(EngineError),
    /// A checkpoint was closed without a decision.
    Dismissed,
    /// The turn was aborted and the live conversation cleared.
    Cancelled,
}

/// Events emitted by the session controller during a turn.
#[derive(Debug, Clone)]
pub enum TurnUpdate {
    /// Current state of the conversation.
    Snapshot(Arc<ConversationState>),

    /// A checkpoint now waits for a decision.
    CheckpointOpened {
        instance_id: String,
        requested_by: Option<String>,
        content: String,
        message: Option<String>,
    },

    /// A submitted decision was accepted and applied.
    CheckpointResolved { instance_id: String, summary: String },

    /// User-visible notice from the backend.
    Notice(String),

    /// Recoverable problem (skipped line, rejected decision, failed save).
    Warning(EngineError),

    /// The turn is over; always the last update of a turn.
    Finished(TurnOutcome),
}

pub type TurnUpdateTx = mpsc::Sender<Arc<TurnUpdate>>;
pub type TurnUpdateRx = mpsc::Receiver<Arc<TurnUpdate>>;

/// Default capacity for bounded update channels.
pub const DEFAULT_UPDATE_CHANNEL_CAPACITY: usize = 128;

/// Creates a bounded update channel with the default capacity.
pub fn create_update_channel() -> (TurnUpdateTx, TurnUpdateRx) {
    mpsc::channel(DEFAULT_UPDATE_CHANNEL_CAPACITY)
}

/// Update sender with best-effort and reliable send modes.
///
/// Use `send_delta()` for snapshots, which are superseded by the next one
/// anyway. Use `send_important()` for everything an observer must see.
#[derive(Clone)]
pub struct UpdateSender {
    tx: TurnUpdateTx,
}

impl UpdateSender {
    pub fn new(tx: TurnUpdateTx) -> Self {
        Self { tx }
    }

    /// Best-effort send: never awaits, drops if channel is full.
    pub fn send_delta(&self, update: TurnUpdate) {
        let _ = self.tx.try_send(Arc::new(update));
    }

    /// Reliable send: awaits delivery.
    pub async fn send_important(&self, update: TurnUpdate) {
        let _ = self.tx.send(Arc::new(update)).await;
    }
}
