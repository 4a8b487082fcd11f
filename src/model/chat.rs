//! Chat entity — the top-level container binding a user, a connection, and
//! message history (§3, §4).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::connection::ConnectionDescriptor;

/// Which collections/tables the chat is scoped to when building schema
/// context for the LLM (§4.C).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectedCollections {
    All(AllMarker),
    Named(Vec<String>),
}

/// Serializes/deserializes as the literal string `"ALL"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllMarker;

impl Serialize for AllMarker {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("ALL")
    }
}

impl<'de> Deserialize<'de> for AllMarker {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "ALL" {
            Ok(AllMarker)
        } else {
            Err(serde::de::Error::custom("expected literal \"ALL\""))
        }
    }
}

impl Default for SelectedCollections {
    fn default() -> Self {
        Self::All(AllMarker)
    }
}

impl SelectedCollections {
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All(_))
    }
}

/// Per-chat behavior toggles (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default)]
    pub auto_execute_query: bool,
    #[serde(default = "default_true")]
    pub share_data_with_ai: bool,
    #[serde(default)]
    pub non_tech_mode: bool,
    #[serde(default)]
    pub auto_generate_visualization: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            auto_execute_query: false,
            share_data_with_ai: true,
            non_tech_mode: false,
            auto_generate_visualization: false,
        }
    }
}

/// A conversation bound to one `ConnectionDescriptor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub connection: ConnectionDescriptor,
    #[serde(default)]
    pub selected_collections: SelectedCollections,
    #[serde(default)]
    pub settings: ChatSettings,
    /// Incremented whenever `connection` changes; the schema cache and any
    /// in-flight `ConnectionManager` entry are invalidated on mismatch.
    pub connection_generation: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Chat {
    pub fn new(user_id: Uuid, name: impl Into<String>, connection: ConnectionDescriptor) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            connection,
            selected_collections: SelectedCollections::default(),
            settings: ChatSettings::default(),
            connection_generation: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Swaps the connection and bumps the generation counter, forcing schema
    /// re-introspection and connection-manager entry replacement (§4.A, §4.B).
    pub fn replace_connection(&mut self, connection: ConnectionDescriptor) {
        self.connection = connection;
        self.connection_generation += 1;
        self.updated_at = chrono::Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::connection::{DbType, SslConfig};

    fn sample_connection() -> ConnectionDescriptor {
        ConnectionDescriptor {
            db_type: DbType::Postgres,
            host: "localhost".into(),
            port: 5432,
            database: "mydb".into(),
            auth_database: None,
            username: "user".into(),
            password: "secret".into(),
            ssl: SslConfig::default(),
            ssh: None,
            schema_name: None,
            google_sheet_id: None,
            google_access_token: None,
            google_refresh_token: None,
        }
    }

    #[test]
    fn test_new_chat_defaults_to_all_collections() {
        let chat = Chat::new(Uuid::new_v4(), "My chat", sample_connection());
        assert!(chat.selected_collections.is_all());
        assert_eq!(chat.connection_generation, 0);
    }

    #[test]
    fn test_replace_connection_bumps_generation() {
        let mut chat = Chat::new(Uuid::new_v4(), "My chat", sample_connection());
        chat.replace_connection(sample_connection());
        assert_eq!(chat.connection_generation, 1);
    }

    #[test]
    fn test_default_settings_share_data_with_ai() {
        let settings = ChatSettings::default();
        assert!(settings.share_data_with_ai);
        assert!(!settings.auto_execute_query);
    }
}
