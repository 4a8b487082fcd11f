//! Chat message entity and the LLM-context projection used when assembling
//! prompts (§3, §4.C).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::query::Query;

/// Discriminates a message's origin and rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    System,
}

/// A single turn in a chat's history, persisted under `crate::persistence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    /// For an assistant message, the user message that triggered it (§3).
    pub origin_message_id: Option<Uuid>,
    pub is_edited: bool,
    pub is_pinned: bool,
    pub pinned_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Queries the LLM proposed alongside this message, if any (§4.C).
    #[serde(default)]
    pub queries: Vec<Query>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Message {
    pub fn new(chat_id: Uuid, user_id: Uuid, message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chat_id,
            user_id,
            message_type,
            content: content.into(),
            origin_message_id: None,
            is_edited: false,
            is_pinned: false,
            pinned_at: None,
            queries: Vec::new(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Editing a user message resets the immediately following assistant
    /// message's queries to unexecuted (§4.D edge-case policy). The caller
    /// (persistence layer, which owns the following message) applies the
    /// reset; this only updates the edited message itself.
    pub fn apply_edit(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.is_edited = true;
    }

    pub fn pin(&mut self) {
        self.is_pinned = true;
        self.pinned_at = Some(chrono::Utc::now());
    }

    pub fn unpin(&mut self) {
        self.is_pinned = false;
        self.pinned_at = None;
    }
}

/// A compacted message used to build the LLM's context window — only the
/// fields that affect generation survive (§4.C: context assembly strips
/// rollback/pagination bookkeeping that doesn't help the model). This is
/// the replayable prompt history distinct from the user-visible `Message`
/// history (§3, GLOSSARY "LLM context").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmContextMessage {
    pub chat_id: Uuid,
    pub role: MessageType,
    pub content: LlmContextContent,
    /// Snapshot of the chat's `nonTechMode` setting at the time this entry
    /// was recorded, so historical entries keep rendering consistently even
    /// if the chat's setting later changes (§3).
    pub non_tech_mode: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// The three shapes a context entry's content can take (§3): a user's raw
/// message, an assistant's proposed/executed query set, or a system note
/// emitted when the connection's schema changed underneath the chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LlmContextContent {
    UserMessage { text: String },
    AssistantResponse { text: String, queries: Vec<Query> },
    SchemaUpdate { summary: String },
}

impl LlmContextMessage {
    pub fn user(chat_id: Uuid, text: impl Into<String>, non_tech_mode: bool) -> Self {
        Self {
            chat_id,
            role: MessageType::User,
            content: LlmContextContent::UserMessage { text: text.into() },
            non_tech_mode,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn assistant(
        chat_id: Uuid,
        text: impl Into<String>,
        queries: Vec<Query>,
        non_tech_mode: bool,
    ) -> Self {
        Self {
            chat_id,
            role: MessageType::Assistant,
            content: LlmContextContent::AssistantResponse {
                text: text.into(),
                queries,
            },
            non_tech_mode,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn schema_update(chat_id: Uuid, summary: impl Into<String>) -> Self {
        Self {
            chat_id,
            role: MessageType::System,
            content: LlmContextContent::SchemaUpdate {
                summary: summary.into(),
            },
            non_tech_mode: false,
            created_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_has_no_queries() {
        let msg = Message::new(Uuid::new_v4(), Uuid::new_v4(), MessageType::User, "hello");
        assert!(msg.queries.is_empty());
        assert_eq!(msg.message_type, MessageType::User);
    }

    #[test]
    fn test_pin_and_unpin() {
        let mut msg = Message::new(Uuid::new_v4(), Uuid::new_v4(), MessageType::Assistant, "hi");
        msg.pin();
        assert!(msg.is_pinned);
        assert!(msg.pinned_at.is_some());
        msg.unpin();
        assert!(!msg.is_pinned);
        assert!(msg.pinned_at.is_none());
    }

    #[test]
    fn test_edit_marks_edited() {
        let mut msg = Message::new(Uuid::new_v4(), Uuid::new_v4(), MessageType::User, "hi");
        msg.apply_edit("hello");
        assert!(msg.is_edited);
        assert_eq!(msg.content, "hello");
    }
}
