//! Connection descriptor (§3) — the discriminated union of per-dialect
//! connection fields embedded in a `Chat`.

use serde::{Deserialize, Serialize};

/// Supported database backends, one per §1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    Postgres,
    Yugabyte,
    Mysql,
    Clickhouse,
    Mongodb,
    Redis,
    Neo4j,
    Spreadsheet,
    GoogleSheets,
}

impl DbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Yugabyte => "yugabyte",
            Self::Mysql => "mysql",
            Self::Clickhouse => "clickhouse",
            Self::Mongodb => "mongodb",
            Self::Redis => "redis",
            Self::Neo4j => "neo4j",
            Self::Spreadsheet => "spreadsheet",
            Self::GoogleSheets => "google_sheets",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "yugabyte" | "yugabytedb" => Some(Self::Yugabyte),
            "mysql" => Some(Self::Mysql),
            "clickhouse" => Some(Self::Clickhouse),
            "mongodb" | "mongo" => Some(Self::Mongodb),
            "redis" => Some(Self::Redis),
            "neo4j" => Some(Self::Neo4j),
            "spreadsheet" => Some(Self::Spreadsheet),
            "google_sheets" | "googlesheets" => Some(Self::GoogleSheets),
            _ => None,
        }
    }

    /// True for the two dialects that delegate to the relational driver with
    /// an isolated per-chat schema namespace (§4.A).
    pub fn is_sheet_backed(&self) -> bool {
        matches!(self, Self::Spreadsheet | Self::GoogleSheets)
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres | Self::Yugabyte | Self::Spreadsheet | Self::GoogleSheets => 5432,
            Self::Mysql => 3306,
            Self::Clickhouse => 9000,
            Self::Mongodb => 27017,
            Self::Redis => 6379,
            Self::Neo4j => 7687,
        }
    }
}

/// TLS options, shared across dialects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SslConfig {
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub cert_url: Option<String>,
    #[serde(default)]
    pub key_url: Option<String>,
    #[serde(default)]
    pub root_cert_url: Option<String>,
}

/// SSH authentication method (§4.A — host-key verification is "insecure
/// accept" by explicit, documented design choice).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SshAuthMethod {
    PublicKey,
    Password,
}

/// SSH tunnel configuration, used as a pre-connect step (§4.A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: SshAuthMethod,
    /// PEM-encoded private key, required when `auth_method == PublicKey`.
    /// Encrypted at rest.
    pub private_key: Option<String>,
    /// Required when `auth_method == Password`. Encrypted at rest.
    pub password: Option<String>,
    /// Passphrase for an encrypted private key. Encrypted at rest.
    pub passphrase: Option<String>,
}

/// Discriminated connection descriptor embedded in a `Chat` (§3).
///
/// Secret fields (`password`, SSH credentials, Google tokens) are encrypted
/// at rest; callers must decrypt via `crate::crypto::CredCrypto` before
/// handing the descriptor to a driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    #[serde(rename = "type")]
    pub db_type: DbType,
    pub host: String,
    pub port: u16,
    pub database: String,
    #[serde(default)]
    pub auth_database: Option<String>,
    pub username: String,
    /// Encrypted at rest.
    pub password: String,
    #[serde(default)]
    pub ssl: SslConfig,
    #[serde(default)]
    pub ssh: Option<SshConfig>,

    // Spreadsheet / google_sheets variant fields.
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default)]
    pub google_sheet_id: Option<String>,
    /// Encrypted at rest.
    #[serde(default)]
    pub google_access_token: Option<String>,
    /// Encrypted at rest.
    #[serde(default)]
    pub google_refresh_token: Option<String>,
}

impl ConnectionDescriptor {
    /// Non-secret fields plus a hash of the secret fields — used by the
    /// Connection Manager as the "config key" for idempotent `connect` reuse
    /// (§4.B: "reuses an entry with an identical config key").
    pub fn config_key(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.password.as_bytes());
        if let Some(ssh) = &self.ssh {
            hasher.update(ssh.private_key.as_deref().unwrap_or("").as_bytes());
            hasher.update(ssh.password.as_deref().unwrap_or("").as_bytes());
            hasher.update(ssh.passphrase.as_deref().unwrap_or("").as_bytes());
        }
        hasher.update(self.google_access_token.as_deref().unwrap_or("").as_bytes());
        hasher.update(self.google_refresh_token.as_deref().unwrap_or("").as_bytes());
        let secret_hash = format!("{:x}", hasher.finalize());

        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.db_type.as_str(),
            self.host,
            self.port,
            self.database,
            self.username,
            self.schema_name.as_deref().unwrap_or(""),
            secret_hash
        )
    }

    /// The per-chat schema namespace used by spreadsheet-backed sources
    /// (§4.A, §6: `conn_<chatID>`).
    pub fn sheet_namespace(chat_id: &str) -> String {
        format!("conn_{chat_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConnectionDescriptor {
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
    fn test_config_key_changes_with_secret() {
        let a = sample();
        let mut b = sample();
        b.password = "different".into();
        assert_ne!(a.config_key(), b.config_key());
    }

    #[test]
    fn test_config_key_stable_for_identical_config() {
        assert_eq!(sample().config_key(), sample().config_key());
    }

    #[test]
    fn test_db_type_roundtrip() {
        for t in [
            DbType::Postgres,
            DbType::Yugabyte,
            DbType::Mysql,
            DbType::Clickhouse,
            DbType::Mongodb,
            DbType::Redis,
            DbType::Neo4j,
            DbType::Spreadsheet,
            DbType::GoogleSheets,
        ] {
            assert_eq!(DbType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_sheet_backed_types() {
        assert!(DbType::Spreadsheet.is_sheet_backed());
        assert!(DbType::GoogleSheets.is_sheet_backed());
        assert!(!DbType::Postgres.is_sheet_backed());
    }

    #[test]
    fn test_sheet_namespace() {
        assert_eq!(ConnectionDescriptor::sheet_namespace("abc123"), "conn_abc123");
    }
}
