//! # Session Directory Node - Main Entry Point
//!
//! Runs a [`session_directory::DirectoryNode`]: accepts control links from
//! session hosts, dials the configured ones, and keeps the session, presence and
//! lobby views replicated until shutdown.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! directory-node
//!
//! # Specify custom configuration
//! directory-node --config production.toml
//!
//! # Override settings and dial two hosts
//! directory-node --bind 0.0.0.0:7400 --host ws://10.0.0.1:5057 --host ws://10.0.0.2:5057
//!
//! # JSON logging for production
//! directory-node --json-logs
//! ```
//!
//! ## Configuration
//!
//! The node loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! SIGINT and SIGTERM start a graceful shutdown; a second signal exits at once.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point for the directory node.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging settings come from the file before CLI overrides are merged.
    let mut logging_settings = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default()
        .logging;
    if let Some(level) = &args.log_level {
        logging_settings.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging_settings, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{HostSettings, LobbySettings, LoggingSettings, ReplicationSettings, ServerSettings};
