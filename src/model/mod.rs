//! Data model for NeoBase (§3).
//!
//! Entities here are persisted through `crate::persistence`; this module only
//! defines shapes and the invariants that can be checked without a database
//! round trip (e.g. `Chat::reset_on_connection_change`).

pub mod chat;
pub mod connection;
pub mod message;
pub mod query;
pub mod user;
pub mod visualization;

pub use chat::{Chat, ChatSettings, SelectedCollections};
pub use connection::{ConnectionDescriptor, DbType, SshAuthMethod, SshConfig, SslConfig};
pub use message::{LlmContextContent, LlmContextMessage, Message, MessageType};
pub use query::{Pagination, Query, QueryType};
pub use user::{FederatedIdentity, User};
pub use visualization::Visualization;
