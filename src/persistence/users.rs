//! User repository (§3, §4.H).

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{NeoBaseError, Result};
use crate::model::user::{FederatedIdentity, User};

pub struct UserRepo<'a> {
    pool: &'a PgPool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    credential_hash: String,
    federated_identity: Option<serde_json::Value>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = NeoBaseError;

    fn try_from(row: UserRow) -> Result<Self> {
        let federated_identity = row
            .federated_identity
            .map(serde_json::from_value::<FederatedIdentity>)
            .transpose()
            .map_err(|e| NeoBaseError::internal(format!("corrupt federated_identity: {e}")))?;
        Ok(User {
            id: row.id,
            username: row.username,
            email: row.email,
            credential_hash: row.credential_hash,
            federated_identity,
            created_at: row.created_at,
        })
    }
}

impl<'a> UserRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, user: &User) -> Result<()> {
        let federated_identity = user
            .federated_identity
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| NeoBaseError::internal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO users (id, username, email, credential_hash, federated_identity, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.credential_hash)
        .bind(federated_identity)
        .bind(user.created_at)
        .execute(self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                NeoBaseError::conflict(format!("username or email already registered: {e}"))
            }
            _ => NeoBaseError::from(e),
        })?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<User> {
        let row: UserRow = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(NeoBaseError::from)?
            .ok_or_else(|| NeoBaseError::not_found(format!("user {id} not found")))?;
        row.try_into()
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(self.pool)
            .await
            .map_err(NeoBaseError::from)?;
        row.map(TryInto::try_into).transpose()
    }
}

#[cfg(test)]
mod tests {
    // Exercised against a live Postgres instance in tests/integration/.
}
