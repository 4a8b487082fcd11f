//! LLM context repository (§3, §4.C, §4.D).
//!
//! The replayable prompt history distinct from the user-visible `Message`
//! history — a `LlmContextMessage` is appended for every user turn,
//! assistant turn, and schema-change system note.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{NeoBaseError, Result};
use crate::model::message::{LlmContextContent, LlmContextMessage, MessageType};

pub struct LlmContextRepo<'a> {
    pool: &'a PgPool,
}

#[derive(sqlx::FromRow)]
struct ContextRow {
    chat_id: Uuid,
    role: String,
    content: serde_json::Value,
    non_tech_mode: bool,
    created_at: chrono::DateTime<chrono::Utc>,
}

fn role_str(role: MessageType) -> &'static str {
    match role {
        MessageType::User => "user",
        MessageType::Assistant => "assistant",
        MessageType::System => "system",
    }
}

impl TryFrom<ContextRow> for LlmContextMessage {
    type Error = NeoBaseError;

    fn try_from(row: ContextRow) -> Result<Self> {
        let role = match row.role.as_str() {
            "user" => MessageType::User,
            "assistant" => MessageType::Assistant,
            "system" => MessageType::System,
            other => return Err(NeoBaseError::internal(format!("unknown role in storage: {other}"))),
        };
        let content: LlmContextContent = serde_json::from_value(row.content)
            .map_err(|e| NeoBaseError::internal(format!("corrupt context content JSON: {e}")))?;
        Ok(LlmContextMessage {
            chat_id: row.chat_id,
            role,
            content,
            non_tech_mode: row.non_tech_mode,
            created_at: row.created_at,
        })
    }
}

impl<'a> LlmContextRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: &LlmContextMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO llm_context_messages (chat_id, role, content, non_tech_mode, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.chat_id)
        .bind(role_str(entry.role))
        .bind(serde_json::to_value(&entry.content).map_err(|e| NeoBaseError::internal(e.to_string()))?)
        .bind(entry.non_tech_mode)
        .bind(entry.created_at)
        .execute(self.pool)
        .await
        .map_err(NeoBaseError::from)?;
        Ok(())
    }

    /// The chat's full context window, oldest first, used to build the
    /// prompt (§4.C `buildMessagesCached`).
    pub async fn history(&self, chat_id: Uuid) -> Result<Vec<LlmContextMessage>> {
        let rows: Vec<ContextRow> =
            sqlx::query_as("SELECT * FROM llm_context_messages WHERE chat_id = $1 ORDER BY created_at ASC")
                .bind(chat_id)
                .fetch_all(self.pool)
                .await
                .map_err(NeoBaseError::from)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
