//! Log output for the directory node.
//!
//! The library logs host lifecycle transitions with structured `host` and
//! `session` fields; this module decides where those records end up.

use crate::config::LoggingSettings;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `[logging] level`, which makes it possible to run a
/// single node with e.g. `session_directory::replication=trace` to follow one
/// flapping host. JSON output is chosen by `--json-logs` or
/// `[logging] json_format`. With `[logging] file_path` set, an ANSI-free copy
/// of every record is appended to that file.
///
/// Fails if the log file cannot be opened or a subscriber is already installed.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let file_layer = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_thread_ids(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if json_format || config.json_format {
        registry
            .with(fmt::layer()
                .json()
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(true)
                .with_thread_names(true)
            )
            .try_init()?;
    } else {
        registry
            .with(fmt::layer()
                .with_ansi(true)
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(true)
                .with_thread_names(true)
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}

/// Logs the startup banner, so it also lands in JSON and file output.
pub fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║        🗂️  SESSION DIRECTORY NODE         ║");
    info!("║                 v{:<10}              ║", version);
    info!("║                                          ║");
    info!("║  Host replication with reconnect + TTL   ║");
    info!("║  Presence lookup                         ║");
    info!("║  Filtered lobby feeds                    ║");
    info!("║                                          ║");
    info!("╚══════════════════════════════════════════╝");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // The only test in this crate that installs the global subscriber.
    #[test]
    fn test_file_path_receives_plain_copy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("directory.log");
        let settings = LoggingSettings {
            level: "info".to_string(),
            json_format: false,
            file_path: Some(path.to_string_lossy().to_string()),
        };

        setup_logging(&settings, false).unwrap();
        info!(host = "gs-1", "host replicated");

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("host replicated"));
        assert!(written.contains("gs-1"));
        assert!(!written.contains("\u{1b}["));
    }
}
