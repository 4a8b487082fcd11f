//! Ephemeral key/value cache (§3 "Ephemeral cache entries", §6 key
//! patterns).
//!
//! Backs password-reset OTPs, the refresh-token allow-list, and spreadsheet
//! import metadata — all single-shot, no-transaction reads/writes against
//! one `cache_entries` table keyed by the literal patterns §6 specifies:
//! `password_reset_otp:<email>`, `refresh_token:<userID>:<token>`,
//! `import_metadata:<chatID>`.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{NeoBaseError, Result};

pub struct CacheRepo<'a> {
    pool: &'a PgPool,
}

impl<'a> CacheRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Single-shot upsert with an expiry; no transaction wraps this (§5
    /// "Ephemeral cache operations are single-shot").
    pub async fn set(&self, key: &str, value: &serde_json::Value, ttl: chrono::Duration) -> Result<()> {
        let expires_at = chrono::Utc::now() + ttl;
        sqlx::query(
            "INSERT INTO cache_entries (key, value, expires_at) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(self.pool)
        .await
        .map_err(NeoBaseError::from)?;
        Ok(())
    }

    /// Returns the value if present and not expired; expired rows are
    /// lazily deleted on read.
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<(serde_json::Value, chrono::DateTime<chrono::Utc>)> =
            sqlx::query_as("SELECT value, expires_at FROM cache_entries WHERE key = $1")
                .bind(key)
                .fetch_optional(self.pool)
                .await
                .map_err(NeoBaseError::from)?;

        match row {
            Some((value, expires_at)) if expires_at > chrono::Utc::now() => Ok(Some(value)),
            Some(_) => {
                self.delete(key).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = $1")
            .bind(key)
            .execute(self.pool)
            .await
            .map_err(NeoBaseError::from)?;
        Ok(())
    }

    /// Periodic sweep of expired rows; not required for correctness (reads
    /// lazily delete) but keeps the table from growing unbounded.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= now()")
            .execute(self.pool)
            .await
            .map_err(NeoBaseError::from)?;
        Ok(result.rows_affected())
    }

    const OTP_TTL: i64 = 10;
    const IMPORT_METADATA_TTL_DAYS: i64 = 7;

    pub async fn set_password_reset_otp(&self, email: &str, otp: &str) -> Result<()> {
        self.set(
            &format!("password_reset_otp:{email}"),
            &serde_json::Value::String(otp.to_string()),
            chrono::Duration::minutes(Self::OTP_TTL),
        )
        .await
    }

    pub async fn get_password_reset_otp(&self, email: &str) -> Result<Option<String>> {
        let value = self.get(&format!("password_reset_otp:{email}")).await?;
        Ok(value.and_then(|v| v.as_str().map(str::to_string)))
    }

    pub async fn allow_refresh_token(&self, user_id: Uuid, token: &str) -> Result<()> {
        self.set(
            &format!("refresh_token:{user_id}:{token}"),
            &serde_json::Value::Bool(true),
            chrono::Duration::days(30),
        )
        .await
    }

    pub async fn is_refresh_token_allowed(&self, user_id: Uuid, token: &str) -> Result<bool> {
        Ok(self.get(&format!("refresh_token:{user_id}:{token}")).await?.is_some())
    }

    pub async fn revoke_refresh_token(&self, user_id: Uuid, token: &str) -> Result<()> {
        self.delete(&format!("refresh_token:{user_id}:{token}")).await
    }

    pub async fn set_import_metadata(&self, chat_id: Uuid, metadata: &serde_json::Value) -> Result<()> {
        self.set(
            &format!("import_metadata:{chat_id}"),
            metadata,
            chrono::Duration::days(Self::IMPORT_METADATA_TTL_DAYS),
        )
        .await
    }

    pub async fn get_import_metadata(&self, chat_id: Uuid) -> Result<Option<serde_json::Value>> {
        self.get(&format!("import_metadata:{chat_id}")).await
    }
}
