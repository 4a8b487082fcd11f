//! Message (and nested `Query`) repository (§3, §4.D, §4.H).
//!
//! Queries are stored inline as a JSONB array on their owning message rather
//! than a separate table — they're never queried independently of their
//! message and always rewritten as a whole (§4.D's state machine mutates one
//! `Query` at a time but persists the full array back).

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{NeoBaseError, Result};
use crate::model::message::{Message, MessageType};
use crate::model::query::Query;

pub struct MessageRepo<'a> {
    pool: &'a PgPool,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    chat_id: Uuid,
    user_id: Uuid,
    message_type: String,
    content: String,
    origin_message_id: Option<Uuid>,
    is_edited: bool,
    is_pinned: bool,
    pinned_at: Option<chrono::DateTime<chrono::Utc>>,
    queries: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

fn message_type_str(t: MessageType) -> &'static str {
    match t {
        MessageType::User => "user",
        MessageType::Assistant => "assistant",
        MessageType::System => "system",
    }
}

fn parse_message_type(s: &str) -> Result<MessageType> {
    match s {
        "user" => Ok(MessageType::User),
        "assistant" => Ok(MessageType::Assistant),
        "system" => Ok(MessageType::System),
        other => Err(NeoBaseError::internal(format!("unknown message_type in storage: {other}"))),
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = NeoBaseError;

    fn try_from(row: MessageRow) -> Result<Self> {
        let queries: Vec<Query> = serde_json::from_value(row.queries)
            .map_err(|e| NeoBaseError::internal(format!("corrupt queries JSON: {e}")))?;
        Ok(Message {
            id: row.id,
            chat_id: row.chat_id,
            user_id: row.user_id,
            message_type: parse_message_type(&row.message_type)?,
            content: row.content,
            origin_message_id: row.origin_message_id,
            is_edited: row.is_edited,
            is_pinned: row.is_pinned,
            pinned_at: row.pinned_at,
            queries,
            created_at: row.created_at,
        })
    }
}

impl<'a> MessageRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, message: &Message) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (id, chat_id, user_id, message_type, content, origin_message_id, \
             is_edited, is_pinned, pinned_at, queries, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(message.id)
        .bind(message.chat_id)
        .bind(message.user_id)
        .bind(message_type_str(message.message_type))
        .bind(&message.content)
        .bind(message.origin_message_id)
        .bind(message.is_edited)
        .bind(message.is_pinned)
        .bind(message.pinned_at)
        .bind(serde_json::to_value(&message.queries).map_err(|e| NeoBaseError::internal(e.to_string()))?)
        .bind(message.created_at)
        .execute(self.pool)
        .await
        .map_err(NeoBaseError::from)?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Message> {
        let row: MessageRow = sqlx::query_as("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(NeoBaseError::from)?
            .ok_or_else(|| NeoBaseError::not_found(format!("message {id} not found")))?;
        row.try_into()
    }

    pub async fn list_for_chat(&self, chat_id: Uuid) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> =
            sqlx::query_as("SELECT * FROM messages WHERE chat_id = $1 ORDER BY created_at ASC")
                .bind(chat_id)
                .fetch_all(self.pool)
                .await
                .map_err(NeoBaseError::from)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// The assistant message immediately following `user_message_id`, if
    /// any — used by the edit-cascade policy (§4.D: editing a user message
    /// resets the following assistant message's queries).
    pub async fn following_assistant_message(&self, user_message_id: Uuid) -> Result<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT * FROM messages WHERE origin_message_id = $1 AND message_type = 'assistant' \
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(user_message_id)
        .fetch_optional(self.pool)
        .await
        .map_err(NeoBaseError::from)?;
        row.map(TryInto::try_into).transpose()
    }

    /// Persists a message's full `content`/`is_edited` state after a user
    /// edit (§4.D edge-case policy).
    pub async fn update_content(&self, id: Uuid, content: &str, is_edited: bool) -> Result<()> {
        sqlx::query("UPDATE messages SET content = $2, is_edited = $3 WHERE id = $1")
            .bind(id)
            .bind(content)
            .bind(is_edited)
            .execute(self.pool)
            .await
            .map_err(NeoBaseError::from)?;
        Ok(())
    }

    /// Rewrites the full `queries` array for a message — the unit of
    /// persistence for every pipeline state transition (§4.D).
    pub async fn save_queries(&self, message_id: Uuid, queries: &[Query]) -> Result<()> {
        sqlx::query("UPDATE messages SET queries = $2 WHERE id = $1")
            .bind(message_id)
            .bind(serde_json::to_value(queries).map_err(|e| NeoBaseError::internal(e.to_string()))?)
            .execute(self.pool)
            .await
            .map_err(NeoBaseError::from)?;
        Ok(())
    }

    pub async fn pin(&self, id: Uuid, pinned: bool) -> Result<()> {
        let pinned_at = if pinned { Some(chrono::Utc::now()) } else { None };
        sqlx::query("UPDATE messages SET is_pinned = $2, pinned_at = $3 WHERE id = $1")
            .bind(id)
            .bind(pinned)
            .bind(pinned_at)
            .execute(self.pool)
            .await
            .map_err(NeoBaseError::from)?;
        Ok(())
    }
}
