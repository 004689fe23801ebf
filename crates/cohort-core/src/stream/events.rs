//! Wire-level events produced by the agent backend.
//!
//! Each event arrives as one `data: <JSON>` line; the `type` field selects
//! the variant. Unknown fields are ignored and unknown types decode to
//! [`ServerEvent::Unknown`].

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Display descriptor sent along with `agent_start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
    /// Avatar glyph (usually a single emoji)
    pub avatar: String,
    pub color: String,
}

/// Events streamed by the backend during one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// An agent began working; opens a new instance of its type.
    AgentStart { agent: String, agent_info: AgentInfo },

    /// Text fragment. Without an agent it belongs to the message itself.
    Chunk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        content: String,
    },

    /// An agent finished. May repeat the agent's full output.
    AgentEnd {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },

    /// Human approval required before the turn may finish.
    UserProxy {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The backend finished the turn.
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The backend failed the turn.
    Error {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },

    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Parses one JSON payload (the part after `data:`).
    ///
    /// # Errors
    /// Returns a framing error if the payload is not a conforming event.
    pub fn parse(payload: &str) -> EngineResult<Self> {
        serde_json::from_str(payload).map_err(|e| {
            EngineError::framing(format!("Invalid event payload: {e}"))
                .with_details(truncate(payload, 200))
        })
    }

    /// Renders the event as one stream frame (`data: <json>\n\n`).
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }

    /// The wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::AgentStart { .. } => "agent_start",
            ServerEvent::Chunk { .. } => "chunk",
            ServerEvent::AgentEnd { .. } => "agent_end",
            ServerEvent::UserProxy { .. } => "user_proxy",
            ServerEvent::Complete { .. } => "complete",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Unknown => "unknown",
        }
    }

    /// The agent type the event addresses, if any.
    pub fn agent(&self) -> Option<&str> {
        match self {
            ServerEvent::AgentStart { agent, .. } | ServerEvent::AgentEnd { agent, .. } => {
                Some(agent)
            }
            ServerEvent::Chunk { agent, .. }
            | ServerEvent::UserProxy { agent, .. }
            | ServerEvent::Error { agent, .. } => agent.as_deref(),
            ServerEvent::Complete { .. } | ServerEvent::Unknown => None,
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_agent_start_ignores_extra_fields() {
        let event = ServerEvent::parse(
            r##"{"type":"agent_start","agent":"analyzer","content":"","agent_info":{"name":"Analyzer","description":"Reads input","avatar":"🔍","color":"#1890ff"}}"##,
        )
        .unwrap();

        match event {
            ServerEvent::AgentStart { agent, agent_info } => {
                assert_eq!(agent, "analyzer");
                assert_eq!(agent_info.name, "Analyzer");
                assert_eq!(agent_info.avatar, "🔍");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_chunk_without_agent() {
        let event = ServerEvent::parse(r#"{"type":"chunk","content":"hi"}"#).unwrap();
        assert_eq!(
            event,
            ServerEvent::Chunk {
                agent: None,
                content: "hi".to_string()
            }
        );
        assert_eq!(event.agent(), None);
    }

    #[test]
    fn test_parse_error_with_finished_flag() {
        let event =
            ServerEvent::parse(r#"{"type":"error","content":"boom","agent":"writer","finished":true}"#)
                .unwrap();
        assert_eq!(event.kind(), "error");
        assert_eq!(event.agent(), Some("writer"));
    }

    #[test]
    fn test_unknown_type_is_not_an_error() {
        let event = ServerEvent::parse(r#"{"type":"heartbeat","ts":1}"#).unwrap();
        assert_eq!(event, ServerEvent::Unknown);
    }

    #[test]
    fn test_missing_required_field_is_framing_error() {
        let err = ServerEvent::parse(r#"{"type":"chunk","agent":"a"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Framing);

        let err = ServerEvent::parse("{not json").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Framing);
        assert_eq!(err.details.as_deref(), Some("{not json"));
    }

    #[test]
    fn test_frame_is_a_single_data_line() {
        let frame = ServerEvent::Complete { message: None }.to_frame().unwrap();
        assert_eq!(frame, "data: {\"type\":\"complete\"}\n\n");
    }
}
