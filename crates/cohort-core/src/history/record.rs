use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::core::conversation::ConversationMessage;

/// Characters of the last message kept in a preview.
pub const PREVIEW_CHARS: usize = 50;

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    /// Preview of the last message
    pub last_message: String,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<ConversationMessage>,
}

impl SessionRecord {
    /// One-line summary used by listings.
    pub fn summary_line(&self) -> String {
        let updated = self.last_updated.with_timezone(&Local).format("%Y-%m-%d %H:%M");
        format!(
            "{}  {}  {} messages  {}",
            self.id, self.title, self.message_count, updated
        )
    }
}

/// Preview of the last message: up to [`PREVIEW_CHARS`] characters, with
/// `...` appended only when text was cut.
pub fn preview(messages: &[ConversationMessage]) -> String {
    let Some(last) = messages.last() else {
        return String::new();
    };
    let text = last.display_text();
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text,
    }
}

/// Title given to sessions saved without one.
pub fn default_title(at: DateTime<Utc>) -> String {
    format!(
        "Conversation {}",
        at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    )
}
