//! Conversation state model.
//!
//! A [`ConversationState`] is owned by exactly one session controller and
//! only changes through the reducer and the approval functions. Observers
//! receive cloned snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::approval::Checkpoint;
use crate::core::registry::AgentRegistry;
use crate::stream::AgentInfo;

/// Agent type reserved for human approval checkpoints.
pub const USER_PROXY_AGENT: &str = "user_proxy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle of one agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Receiving fragments
    Working,
    /// Checkpoint waiting for a human decision
    Waiting,
    Completed,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Working => write!(f, "working"),
            AgentStatus::Waiting => write!(f, "waiting"),
            AgentStatus::Completed => write!(f, "completed"),
        }
    }
}

/// One execution occurrence of an agent type within a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInstance {
    pub id: String,
    /// Originating agent type
    pub agent: String,
    pub info: AgentInfo,
    pub content: String,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Display position within the message
    pub order: usize,
}

impl AgentInstance {
    pub fn is_working(&self) -> bool {
        self.status == AgentStatus::Working
    }

    pub fn is_checkpoint(&self) -> bool {
        self.agent == USER_PROXY_AGENT
    }
}

/// File attached to a user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    /// Plain text, used when no agent breakdown exists
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "AgentRegistry::is_empty")]
    pub agents: AgentRegistry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<FileAttachment>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn user(
        content: impl Into<String>,
        attachment: Option<FileAttachment>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            agents: AgentRegistry::default(),
            attachment,
            timestamp: at,
        }
    }

    pub fn assistant(at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            agents: AgentRegistry::default(),
            attachment: None,
            timestamp: at,
        }
    }

    /// Text shown for the message in previews and transcripts.
    ///
    /// Plain content wins; otherwise the agent contributions joined in
    /// display order.
    pub fn display_text(&self) -> String {
        if !self.content.is_empty() || self.agents.is_empty() {
            return self.content.clone();
        }
        self.agents
            .iter()
            .map(|instance| instance.content.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Live state of one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    pub session_id: String,
    pub messages: Vec<ConversationMessage>,
    /// Id of the currently active agent instance
    pub current_instance: Option<String>,
    /// True until the in-progress assistant message gets a terminal signal
    pub streaming: bool,
    pub checkpoint: Checkpoint,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::with_messages(session_id, Vec::new())
    }

    pub fn with_messages(session_id: impl Into<String>, messages: Vec<ConversationMessage>) -> Self {
        Self {
            session_id: session_id.into(),
            messages,
            current_instance: None,
            streaming: false,
            checkpoint: Checkpoint::Idle,
        }
    }

    /// Generates a session id of the form `session_<unix millis>`.
    pub fn new_session_id(at: DateTime<Utc>) -> String {
        format!("session_{}", at.timestamp_millis())
    }

    /// Appends the user message and an empty assistant message, and marks
    /// the conversation as streaming.
    pub fn begin_turn(
        &mut self,
        text: &str,
        attachment: Option<FileAttachment>,
        at: DateTime<Utc>,
    ) {
        self.messages
            .push(ConversationMessage::user(text, attachment, at));
        self.messages.push(ConversationMessage::assistant(at));
        self.current_instance = None;
        self.streaming = true;
        self.checkpoint = Checkpoint::Idle;
    }

    /// The in-progress assistant message, if a turn is streaming.
    pub fn open_message(&self) -> Option<&ConversationMessage> {
        self.messages
            .last()
            .filter(|m| self.streaming && m.role == Role::Assistant)
    }

    pub fn open_message_mut(&mut self) -> Option<&mut ConversationMessage> {
        open_assistant(&mut self.messages, self.streaming)
    }

    /// The latest assistant message, whether or not it is still streaming.
    pub fn last_assistant_mut(&mut self) -> Option<&mut ConversationMessage> {
        self.messages
            .last_mut()
            .filter(|m| m.role == Role::Assistant)
    }

    /// Looks up an agent instance in the latest assistant message.
    pub fn instance(&self, id: &str) -> Option<&AgentInstance> {
        self.messages
            .last()
            .filter(|m| m.role == Role::Assistant)
            .and_then(|m| m.agents.get(id))
    }

    /// A turn is finished once the stream is over and no checkpoint is pending.
    pub fn is_turn_finished(&self) -> bool {
        !self.streaming && self.checkpoint.is_idle()
    }

    /// Drops all live messages and resets the turn flags.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.current_instance = None;
        self.streaming = false;
        self.checkpoint = Checkpoint::Idle;
    }
}

pub(crate) fn open_assistant(
    messages: &mut [ConversationMessage],
    streaming: bool,
) -> Option<&mut ConversationMessage> {
    if !streaming {
        return None;
    }
    messages.last_mut().filter(|m| m.role == Role::Assistant)
}
