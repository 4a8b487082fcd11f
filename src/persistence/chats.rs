//! Chat repository (§3, §4.H).
//!
//! Encrypts/decrypts the `ConnectionDescriptor`'s secret fields (password,
//! SSH credentials, Google OAuth tokens) around every read/write so secrets
//! never touch the database in plaintext (§4.J).

use sqlx::PgPool;
use uuid::Uuid;

use crate::crypto::CredCrypto;
use crate::error::{NeoBaseError, Result};
use crate::model::chat::{Chat, ChatSettings, SelectedCollections};
use crate::model::connection::ConnectionDescriptor;

pub struct ChatRepo<'a> {
    pool: &'a PgPool,
    crypto: &'a dyn CredCrypto,
}

#[derive(sqlx::FromRow)]
struct ChatRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    connection: serde_json::Value,
    selected_collections: serde_json::Value,
    settings: serde_json::Value,
    connection_generation: i32,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl<'a> ChatRepo<'a> {
    pub fn new(pool: &'a PgPool, crypto: &'a dyn CredCrypto) -> Self {
        Self { pool, crypto }
    }

    fn encrypt_descriptor(&self, descriptor: &ConnectionDescriptor) -> Result<ConnectionDescriptor> {
        let mut out = descriptor.clone();
        out.password = self.crypto.encrypt(&descriptor.password)?;
        if let Some(ssh) = out.ssh.as_mut() {
            if let Some(pk) = &ssh.private_key {
                ssh.private_key = Some(self.crypto.encrypt(pk)?);
            }
            if let Some(pw) = &ssh.password {
                ssh.password = Some(self.crypto.encrypt(pw)?);
            }
            if let Some(pp) = &ssh.passphrase {
                ssh.passphrase = Some(self.crypto.encrypt(pp)?);
            }
        }
        if let Some(token) = &out.google_access_token {
            out.google_access_token = Some(self.crypto.encrypt(token)?);
        }
        if let Some(token) = &out.google_refresh_token {
            out.google_refresh_token = Some(self.crypto.encrypt(token)?);
        }
        Ok(out)
    }

    fn decrypt_descriptor(&self, descriptor: &ConnectionDescriptor) -> Result<ConnectionDescriptor> {
        let mut out = descriptor.clone();
        out.password = self.crypto.decrypt(&descriptor.password)?;
        if let Some(ssh) = out.ssh.as_mut() {
            if let Some(pk) = &ssh.private_key {
                ssh.private_key = Some(self.crypto.decrypt(pk)?);
            }
            if let Some(pw) = &ssh.password {
                ssh.password = Some(self.crypto.decrypt(pw)?);
            }
            if let Some(pp) = &ssh.passphrase {
                ssh.passphrase = Some(self.crypto.decrypt(pp)?);
            }
        }
        if let Some(token) = &out.google_access_token {
            out.google_access_token = Some(self.crypto.decrypt(token)?);
        }
        if let Some(token) = &out.google_refresh_token {
            out.google_refresh_token = Some(self.crypto.decrypt(token)?);
        }
        Ok(out)
    }

    fn row_to_chat(&self, row: ChatRow) -> Result<Chat> {
        let encrypted: ConnectionDescriptor = serde_json::from_value(row.connection)
            .map_err(|e| NeoBaseError::internal(format!("corrupt connection JSON: {e}")))?;
        let connection = self.decrypt_descriptor(&encrypted)?;
        let selected_collections: SelectedCollections = serde_json::from_value(row.selected_collections)
            .map_err(|e| NeoBaseError::internal(format!("corrupt selected_collections JSON: {e}")))?;
        let settings: ChatSettings = serde_json::from_value(row.settings)
            .map_err(|e| NeoBaseError::internal(format!("corrupt settings JSON: {e}")))?;
        Ok(Chat {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            connection,
            selected_collections,
            settings,
            connection_generation: row.connection_generation as u32,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    /// Number of chats `user_id` currently owns, used to enforce
    /// `AppConfig::effective_chat_cap()` (§1 trial mode).
    pub async fn count_for_user(&self, user_id: Uuid) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chats WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(self.pool)
            .await
            .map_err(NeoBaseError::from)?;
        Ok(count as u32)
    }

    pub async fn create(&self, chat: &Chat) -> Result<()> {
        let encrypted = self.encrypt_descriptor(&chat.connection)?;
        sqlx::query(
            "INSERT INTO chats (id, user_id, name, connection, selected_collections, settings, \
             connection_generation, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(chat.id)
        .bind(chat.user_id)
        .bind(&chat.name)
        .bind(serde_json::to_value(&encrypted).map_err(|e| NeoBaseError::internal(e.to_string()))?)
        .bind(serde_json::to_value(&chat.selected_collections).map_err(|e| NeoBaseError::internal(e.to_string()))?)
        .bind(serde_json::to_value(&chat.settings).map_err(|e| NeoBaseError::internal(e.to_string()))?)
        .bind(chat.connection_generation as i32)
        .bind(chat.created_at)
        .bind(chat.updated_at)
        .execute(self.pool)
        .await
        .map_err(NeoBaseError::from)?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Chat> {
        let row: ChatRow = sqlx::query_as("SELECT * FROM chats WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(NeoBaseError::from)?
            .ok_or_else(|| NeoBaseError::not_found(format!("chat {id} not found")))?;
        self.row_to_chat(row)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Chat>> {
        let rows: Vec<ChatRow> = sqlx::query_as("SELECT * FROM chats WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(self.pool)
            .await
            .map_err(NeoBaseError::from)?;
        rows.into_iter().map(|r| self.row_to_chat(r)).collect()
    }

    /// Replaces the connection and bumps the generation, per
    /// `Chat::replace_connection` (§4.A, §4.B).
    pub async fn replace_connection(&self, id: Uuid, connection: &ConnectionDescriptor) -> Result<Chat> {
        let mut chat = self.get(id).await?;
        chat.replace_connection(connection.clone());
        let encrypted = self.encrypt_descriptor(&chat.connection)?;
        sqlx::query(
            "UPDATE chats SET connection = $2, connection_generation = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(serde_json::to_value(&encrypted).map_err(|e| NeoBaseError::internal(e.to_string()))?)
        .bind(chat.connection_generation as i32)
        .bind(chat.updated_at)
        .execute(self.pool)
        .await
        .map_err(NeoBaseError::from)?;
        Ok(chat)
    }

    pub async fn update_settings(&self, id: Uuid, settings: &ChatSettings) -> Result<()> {
        sqlx::query("UPDATE chats SET settings = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(settings).map_err(|e| NeoBaseError::internal(e.to_string()))?)
            .execute(self.pool)
            .await
            .map_err(NeoBaseError::from)?;
        Ok(())
    }

    /// Updating selected collections forces schema re-introspection
    /// (Open Question 3 — shares the 5-minute deadline with manual refresh);
    /// the caller invalidates the schema cache after this returns.
    pub async fn update_selected_collections(&self, id: Uuid, selected: &SelectedCollections) -> Result<()> {
        sqlx::query("UPDATE chats SET selected_collections = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(selected).map_err(|e| NeoBaseError::internal(e.to_string()))?)
            .execute(self.pool)
            .await
            .map_err(NeoBaseError::from)?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM chats WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(NeoBaseError::from)?;
        Ok(())
    }
}
