//! Human approval checkpoints.
//!
//! A `user_proxy` event moves the checkpoint from `Idle` to
//! `AwaitingApproval`. The stream keeps flowing; only the end of the turn
//! waits for the decision. Resolution happens after the decision has been
//! accepted by the backend, dismissal happens locally.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::conversation::ConversationState;
use crate::error::{EngineError, EngineResult, ErrorKind};

/// Decision text that approves unconditionally.
pub const APPROVE: &str = "APPROVE";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Checkpoint {
    #[default]
    Idle,
    AwaitingApproval {
        instance_id: String,
        /// Agent that asked for the review, when the backend named one
        requested_by: Option<String>,
    },
}

impl Checkpoint {
    pub fn is_idle(&self) -> bool {
        matches!(self, Checkpoint::Idle)
    }

    /// Id of the waiting checkpoint instance.
    pub fn pending_instance(&self) -> Option<&str> {
        match self {
            Checkpoint::Idle => None,
            Checkpoint::AwaitingApproval { instance_id, .. } => Some(instance_id),
        }
    }
}

/// A human decision on a pending checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    /// Free-form revision feedback, forwarded verbatim
    Revise(String),
}

impl Decision {
    /// Interprets raw user input. Empty input and the `APPROVE` sentinel
    /// approve; anything else is revision feedback.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == APPROVE {
            Decision::Approve
        } else {
            Decision::Revise(input.to_string())
        }
    }

    /// Body sent to the feedback endpoint.
    pub fn payload(&self) -> &str {
        match self {
            Decision::Approve => APPROVE,
            Decision::Revise(text) => text,
        }
    }

    /// Text that replaces the checkpoint body once the decision is accepted.
    pub fn summary(&self) -> String {
        match self {
            Decision::Approve => "Approved".to_string(),
            Decision::Revise(text) => format!("Revision requested: {}", text.trim()),
        }
    }
}

/// Applies an accepted decision to the pending checkpoint.
///
/// Returns the id of the resolved checkpoint instance.
///
/// # Errors
/// Returns an error if no checkpoint is pending.
pub fn resolve(
    state: &mut ConversationState,
    decision: &Decision,
    at: DateTime<Utc>,
) -> EngineResult<String> {
    let Checkpoint::AwaitingApproval { instance_id, .. } = std::mem::take(&mut state.checkpoint)
    else {
        return Err(EngineError::new(
            ErrorKind::NoCheckpoint,
            "No approval is pending",
        ));
    };

    let summary = decision.summary();
    let closed = state
        .last_assistant_mut()
        .is_some_and(|m| m.agents.close_checkpoint(&instance_id, Some(&summary), at));
    if !closed {
        debug!(instance = %instance_id, "checkpoint instance no longer waiting");
    }
    if state.current_instance.as_deref() == Some(instance_id.as_str()) {
        state.current_instance = None;
    }
    Ok(instance_id)
}

/// Closes the pending checkpoint without a decision and ends the turn.
///
/// Returns false if nothing was pending.
pub fn dismiss(state: &mut ConversationState, at: DateTime<Utc>) -> bool {
    let Checkpoint::AwaitingApproval { instance_id, .. } = std::mem::take(&mut state.checkpoint)
    else {
        return false;
    };

    if let Some(message) = state.last_assistant_mut() {
        message.agents.close_checkpoint(&instance_id, None, at);
    }
    state.streaming = false;
    state.current_instance = None;
    true
}
