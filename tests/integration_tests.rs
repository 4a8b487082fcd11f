//! Integration tests for NeoBase.
//!
//! Most of these require a reachable Postgres instance. Set `DATABASE_URL`
//! (and, for the connection-manager tests, `NEOBASE_TEST_PG_*`) to run them;
//! each test skips itself with a stderr notice when the relevant env var is
//! unset.
//!
//! Run with: `cargo test --test integration_tests`

mod integration;
