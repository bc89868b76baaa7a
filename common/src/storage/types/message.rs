#![allow(clippy::module_name_repetitions)]
use std::fmt;

use uuid::Uuid;

use crate::stored_object;

use super::citation::Citation;

#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

stored_object!(Message, "message", {
    conversation_id: String,
    role: MessageRole,
    content: String,
    #[serde(default)]
    citations: Vec<Citation>,
    #[serde(default)]
    processing_time_ms: Option<u64>,
    #[serde(default)]
    message_index: u64
});

impl Message {
    pub fn new(
        conversation_id: String,
        role: MessageRole,
        content: String,
        citations: Vec<Citation>,
        processing_time_ms: Option<u64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            conversation_id,
            role,
            content,
            citations,
            processing_time_ms,
            message_index: 0,
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "USER"),
            MessageRole::Assistant => write!(f, "ASSISTANT"),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

/// Renders the most recent `limit` turns as `ROLE: content` lines.
pub fn format_history(history: &[Message], limit: usize) -> String {
    let start = history.len().saturating_sub(limit);
    history
        .iter()
        .skip(start)
        .map(|msg| format!("{msg}"))
        .collect::<Vec<String>>()
        .join("\n")
}
