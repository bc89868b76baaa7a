use uuid::Uuid;

use crate::stored_object;

pub const DEFAULT_CONVERSATION_TITLE: &str = "New FAQ Conversation";
const TITLE_MAX_CHARS: usize = 50;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Archived,
}

stored_object!(Conversation, "conversation", {
    user_id: String,
    title: String,
    #[serde(default)]
    status: ConversationStatus
});

impl Conversation {
    pub fn new(user_id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            title,
            status: ConversationStatus::Active,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.status == ConversationStatus::Archived
    }
}

/// Derives a conversation title from the first user message.
pub fn derive_title(first_message: &str) -> String {
    let collapsed = first_message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return DEFAULT_CONVERSATION_TITLE.to_string();
    }

    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return collapsed;
    }

    let truncated: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", truncated.trim_end())
}
