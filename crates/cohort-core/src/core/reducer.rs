//! Applies server events to conversation state.
//!
//! `update` mutates in place and returns effects for the owning
//! controller; `reduce` is the pure form. Both are deterministic: instance
//! ids derive from the supplied timestamp and the display order.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::approval::Checkpoint;
use crate::core::conversation::{ConversationState, open_assistant};
use crate::stream::{AgentInfo, ServerEvent};

/// Shown in place of the answer when the request or stream fails.
pub const FAILURE_NOTICE: &str = "Sorry, an error occurred. Please try again later.";

/// Side effects requested by the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEffect {
    /// A human decision is now required.
    CheckpointOpened {
        instance_id: String,
        requested_by: Option<String>,
        content: String,
        message: Option<String>,
    },
    /// User-visible notice (server error, superseded checkpoint).
    Notice { message: String },
    /// The backend signalled the end of the stream.
    StreamClosed,
}

/// Applies one event to `state`.
pub fn update(
    state: &mut ConversationState,
    event: &ServerEvent,
    at: DateTime<Utc>,
) -> Vec<TurnEffect> {
    let ConversationState {
        messages,
        current_instance,
        streaming,
        checkpoint,
        ..
    } = state;

    let Some(message) = open_assistant(messages, *streaming) else {
        debug!(kind = event.kind(), "dropping event outside of a streaming turn");
        return Vec::new();
    };

    let mut effects = Vec::new();
    match event {
        ServerEvent::AgentStart { agent, agent_info } => {
            let id = message.agents.start(agent, agent_info.clone(), at);
            debug!(agent = %agent, id = %id, "agent started");
            *current_instance = Some(id);
        }
        ServerEvent::Chunk { agent, content } => {
            if content.is_empty() {
                return effects;
            }
            let routed = agent
                .as_deref()
                .is_some_and(|a| message.agents.append_chunk(a, content));
            if !routed {
                if let Some(agent) = agent {
                    debug!(agent = %agent, "no working instance, appending to message text");
                }
                message.content.push_str(content);
            }
        }
        ServerEvent::AgentEnd { agent, content } => {
            match message.agents.end(agent, content.as_deref(), at) {
                Some(id) => {
                    if current_instance.as_deref() == Some(id.as_str()) {
                        *current_instance = None;
                    }
                }
                None => debug!(agent = %agent, "agent_end without a working instance"),
            }
        }
        ServerEvent::UserProxy {
            agent,
            content,
            message: note,
        } => {
            if let Checkpoint::AwaitingApproval { instance_id, .. } = checkpoint {
                message.agents.close_checkpoint(instance_id, None, at);
                effects.push(TurnEffect::Notice {
                    message: "An earlier approval request was superseded by a new one".to_string(),
                });
            }
            let id = message
                .agents
                .open_checkpoint(checkpoint_info(note.as_deref()), content, at);
            *current_instance = Some(id.clone());
            *checkpoint = Checkpoint::AwaitingApproval {
                instance_id: id.clone(),
                requested_by: agent.clone(),
            };
            effects.push(TurnEffect::CheckpointOpened {
                instance_id: id,
                requested_by: agent.clone(),
                content: content.clone(),
                message: note.clone(),
            });
        }
        ServerEvent::Complete { .. } => {
            *streaming = false;
            *current_instance = None;
            effects.push(TurnEffect::StreamClosed);
        }
        ServerEvent::Error { content, agent } => {
            warn!(agent = ?agent, "server reported an error: {content}");
            message.content.clone_from(content);
            *streaming = false;
            *current_instance = None;
            effects.push(TurnEffect::Notice {
                message: content.clone(),
            });
            effects.push(TurnEffect::StreamClosed);
        }
        ServerEvent::Unknown => {
            debug!("ignoring unknown event type");
        }
    }
    effects
}

/// Pure form of [`update`].
pub fn reduce(state: &ConversationState, event: &ServerEvent, at: DateTime<Utc>) -> ConversationState {
    let mut next = state.clone();
    update(&mut next, event, at);
    next
}

/// Marks the turn as no longer streaming after the byte stream ended.
pub fn end_of_stream(state: &mut ConversationState) {
    state.streaming = false;
    state.current_instance = None;
}

/// Ends the turn after a transport failure.
///
/// The answer text is replaced by a notice; agent contributions received so
/// far stay visible. A pending checkpoint cannot be answered any more and
/// is closed.
pub fn fail_turn(state: &mut ConversationState, reason: &str, at: DateTime<Utc>) {
    if let Some(message) = state.last_assistant_mut() {
        message.content = format!("{FAILURE_NOTICE} ({reason})");
    }
    if let Checkpoint::AwaitingApproval { instance_id, .. } = std::mem::take(&mut state.checkpoint)
        && let Some(message) = state.last_assistant_mut()
    {
        message.agents.close_checkpoint(&instance_id, None, at);
    }
    state.streaming = false;
    state.current_instance = None;
}

fn checkpoint_info(note: Option<&str>) -> AgentInfo {
    AgentInfo {
        name: "User Proxy Agent".to_string(),
        description: note.unwrap_or("Waiting for your approval").to_string(),
        avatar: "👤".to_string(),
        color: "#fa8c16".to_string(),
    }
}
