use async_trait::async_trait;
use chrono::{Duration, Utc};
use surrealdb::opt::PatchOp;
use tracing::debug;

use crate::error::AppError;

use super::{
    db::SurrealDbClient,
    types::{
        citation::Citation,
        conversation::{Conversation, ConversationStatus},
        message::{Message, MessageRole},
        StoredObject,
    },
};

/// Persistence for conversations and their turns.
///
/// Each call is its own unit of work; callers never span a transaction across calls.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, user_id: &str, title: &str) -> Result<String, AppError>;

    /// Appends a turn and bumps the conversation's `updated_at`. Returns the message id.
    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        citations: Vec<Citation>,
        processing_time_ms: Option<u64>,
    ) -> Result<String, AppError>;

    /// Turns in append order.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, AppError>;

    /// Most recently updated first.
    async fn list_conversations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Conversation>, AppError>;

    async fn archive_conversation(&self, conversation_id: &str) -> Result<(), AppError>;
}

fn persistence(err: surrealdb::Error) -> AppError {
    AppError::Persistence(err.to_string())
}

impl SurrealDbClient {
    async fn require_conversation(&self, conversation_id: &str) -> Result<Conversation, AppError> {
        self.get_item::<Conversation>(conversation_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| AppError::NotFound(format!("conversation {conversation_id}")))
    }

    async fn last_message(&self, conversation_id: &str) -> Result<Option<Message>, AppError> {
        let mut response = self
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE conversation_id = $conversation_id \
                 ORDER BY message_index DESC LIMIT 1",
            )
            .bind(("table", Message::table_name()))
            .bind(("conversation_id", conversation_id.to_owned()))
            .await
            .map_err(persistence)?;

        let rows: Vec<Message> = response.take(0).map_err(persistence)?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl ConversationStore for SurrealDbClient {
    async fn create_conversation(&self, user_id: &str, title: &str) -> Result<String, AppError> {
        let conversation = Conversation::new(user_id.to_owned(), title.to_owned());
        let id = conversation.id.clone();

        self.store_item(conversation).await.map_err(persistence)?;
        debug!(conversation_id = %id, "Created conversation");

        Ok(id)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        citations: Vec<Citation>,
        processing_time_ms: Option<u64>,
    ) -> Result<String, AppError> {
        let conversation = self.require_conversation(conversation_id).await?;
        if conversation.is_archived() {
            return Err(AppError::Validation(format!(
                "conversation {conversation_id} is archived"
            )));
        }

        let mut message = Message::new(
            conversation_id.to_owned(),
            role,
            content.to_owned(),
            citations,
            processing_time_ms,
        );

        // Turns must sort strictly after the previous one even within one clock tick.
        if let Some(previous) = self.last_message(conversation_id).await? {
            message.message_index = previous.message_index + 1;
            let floor = previous.created_at + Duration::microseconds(1);
            if message.created_at < floor {
                message.created_at = floor;
                message.updated_at = floor;
            }
        }

        let id = message.id.clone();
        let stamp = message.created_at;
        self.store_item(message).await.map_err(persistence)?;

        let _updated: Option<Conversation> = self
            .update((Conversation::table_name(), conversation_id))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(stamp.max(Utc::now())),
            ))
            .await
            .map_err(persistence)?;

        Ok(id)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, AppError> {
        let mut response = self
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE conversation_id = $conversation_id \
                 ORDER BY message_index ASC",
            )
            .bind(("table", Message::table_name()))
            .bind(("conversation_id", conversation_id.to_owned()))
            .await
            .map_err(persistence)?;

        response.take(0).map_err(persistence)
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Conversation>, AppError> {
        let mut response = self
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE user_id = $user_id \
                 ORDER BY updated_at DESC LIMIT $limit",
            )
            .bind(("table", Conversation::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .bind(("limit", limit as i64))
            .await
            .map_err(persistence)?;

        response.take(0).map_err(persistence)
    }

    async fn archive_conversation(&self, conversation_id: &str) -> Result<(), AppError> {
        self.require_conversation(conversation_id).await?;

        let _updated: Option<Conversation> = self
            .update((Conversation::table_name(), conversation_id))
            .patch(PatchOp::replace("/status", ConversationStatus::Archived))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await
            .map_err(persistence)?;

        Ok(())
    }
}
