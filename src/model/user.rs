//! User entity (§3).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user. Login-identifier uniqueness and credential encryption
/// are enforced by the persistence layer, not this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Password hash; never the plaintext password.
    pub credential_hash: String,
    pub federated_identity: Option<FederatedIdentity>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// An OAuth-style federated identity linked to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedIdentity {
    pub provider: String,
    /// Encrypted at rest via `crate::crypto::CredCrypto`.
    pub access_token: String,
    /// Encrypted at rest via `crate::crypto::CredCrypto`.
    pub refresh_token: String,
}

impl User {
    pub fn new(username: impl Into<String>, email: impl Into<String>, credential_hash: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            credential_hash: credential_hash.into(),
            federated_identity: None,
            created_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_has_no_federated_identity() {
        let user = User::new("alice", "alice@example.com", "hash");
        assert!(user.federated_identity.is_none());
        assert_eq!(user.username, "alice");
    }
}
