//! Logging configuration for NeoBase.
//!
//! The server always logs to stdout — there is no terminal display to
//! protect, unlike the teacher's TUI mode which redirected to a log file.
//! Production environments get structured JSON lines; development gets the
//! teacher's human-readable `fmt` layer, selected by `AppConfig::environment`.

use tracing_subscriber::EnvFilter;

use crate::config::Environment;

/// Initializes global tracing for the server process. Must be called once,
/// before any other module logs.
pub fn init(environment: Environment) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match environment {
        Environment::Production | Environment::Staging => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .init();
        }
        Environment::Development => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }
}
