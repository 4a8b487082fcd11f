//! Command-line argument parsing for NeoBase.
//!
//! Uses clap's derive API the same way the teacher parsed its viewer flags,
//! but the surface is now two subcommands instead of connection flags: the
//! server reads its connection-level configuration from the environment
//! (`crate::config::AppConfig::from_env`), not from argv.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// NeoBase: a multi-tenant AI data copilot backend.
#[derive(Parser, Debug)]
#[command(name = "neobase")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs the HTTP API server.
    Serve {
        /// Overrides `PORT` from the environment.
        #[arg(short, long, value_name = "PORT")]
        port: Option<u16>,

        /// Path to a `.env` file to load before `PORT`/`DATABASE_URL`/etc.
        /// are read (defaults to `.env` in the working directory).
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Runs pending metadata-store migrations and exits.
    Migrate {
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_default() {
        let cli = Cli::parse_from(["neobase", "serve"]);
        match cli.command {
            Command::Serve { port, config } => {
                assert!(port.is_none());
                assert!(config.is_none());
            }
            _ => panic!("expected Serve"),
        }
    }

    #[test]
    fn test_parse_serve_with_port_override() {
        let cli = Cli::parse_from(["neobase", "serve", "--port", "9090"]);
        match cli.command {
            Command::Serve { port, .. } => assert_eq!(port, Some(9090)),
            _ => panic!("expected Serve"),
        }
    }

    #[test]
    fn test_parse_migrate() {
        let cli = Cli::parse_from(["neobase", "migrate"]);
        assert!(matches!(cli.command, Command::Migrate { .. }));
    }

    #[test]
    fn test_parse_serve_with_config_path() {
        let cli = Cli::parse_from(["neobase", "serve", "--config", "/path/to/.env"]);
        match cli.command {
            Command::Serve { config, .. } => {
                assert_eq!(config, Some(PathBuf::from("/path/to/.env")));
            }
            _ => panic!("expected Serve"),
        }
    }
}
