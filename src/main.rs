//! NeoBase — multi-tenant AI data-copilot backend.
//!
//! Entry point for the `neobase` binary: parses the `serve`/`migrate`
//! subcommands, loads configuration from the environment, wires every
//! process-wide collaborator via [`app::AppState::bootstrap`], and serves
//! the HTTP/JSON + SSE surface built by [`api::build_router`].

mod api;
mod app;
mod cli;
mod config;
mod connection;
mod crypto;
mod db;
mod error;
mod ingestion;
mod llm;
mod logging;
mod model;
mod persistence;
mod pipeline;
mod query;
mod safety;
mod schema;
mod stream;
mod visualization;

use cli::{Cli, Command};
use config::AppConfig;
use error::Result;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    if let Err(e) = run(cli).await {
        // Logging may not be initialized yet if config failed fatally before
        // `logging::init` ran, so fall back to stderr either way.
        eprintln!("{}: {}", e.code(), e);
        error!("{}: {}", e.code(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve { port, config } => serve(port, config).await,
        Command::Migrate { config } => migrate(config).await,
    }
}

fn load_config(config_path: Option<std::path::PathBuf>) -> Result<AppConfig> {
    if let Some(path) = config_path {
        // `AppConfig::from_env` already calls `dotenvy::dotenv()` for the
        // default `.env`; an explicit `--config` path loads first so its
        // values are visible to that call too.
        let _ = dotenvy::from_path(&path);
    }
    AppConfig::from_env()
}

async fn serve(port_override: Option<u16>, config_path: Option<std::path::PathBuf>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port_override {
        config.http_port = port;
    }

    logging::init(config.environment);

    let port = config.http_port;
    let (state, reaper) = app::AppState::bootstrap(config).await?;
    let router = api::build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| error::NeoBaseError::fatal(format!("failed to bind port {port}: {e}")))?;

    info!(port, "NeoBase listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| error::NeoBaseError::fatal(format!("server error: {e}")))?;

    tokio::time::timeout(app::SHUTDOWN_GRACE, state.shutdown(reaper))
        .await
        .unwrap_or(());

    Ok(())
}

async fn migrate(config_path: Option<std::path::PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    logging::init(config.environment);

    let crypto: std::sync::Arc<dyn crypto::CredCrypto> =
        std::sync::Arc::new(crypto::AesFieldCrypto::from_passphrase(&config.aes_key_material));
    // `MetadataStore::connect` runs every pending migration as part of
    // connecting; there is nothing further to do once it returns.
    let store = persistence::MetadataStore::connect(&config.metadata_db_url, crypto).await?;
    store.close().await;

    info!("migrations applied");
    Ok(())
}

/// Resolves once SIGINT (Ctrl-C) or, on Unix, SIGTERM is received, so
/// `axum::serve`'s graceful shutdown can drain in-flight requests before
/// `AppState::shutdown` tears down drivers, tunnels, and streams (§9).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
