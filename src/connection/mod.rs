//! Connection Manager (§4.B) — multi-tenant pool of live `Executor`s keyed
//! by chat id, with reference-counted subscribers and an idle-eviction
//! reaper.

pub mod manager;

pub use manager::{spawn_reaper, ConnectionEntry, ConnectionInfo, ConnectionManager};
