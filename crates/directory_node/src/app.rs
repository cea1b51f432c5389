//! Main application logic and lifecycle management.
//!
//! [`Application`] turns the merged configuration into a running
//! [`DirectoryNode`], reports health periodically and drives shutdown.

use crate::{
    cli::CliArgs,
    config::{AppConfig, HostSettings},
    logging::display_banner,
    signals::{setup_signal_handlers, setup_signal_handlers_silent},
};
use session_directory::{DirectoryNode, DirectoryStats};
use std::time::Duration;
use tracing::{error, info, warn};

/// How long background tasks get to stop after shutdown is initiated.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(8);

/// Main application struct.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// The directory node
    node: DirectoryNode,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// Loads configuration, applies CLI overrides, validates settings, and
    /// builds the directory node.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Returns
    ///
    /// A configured `Application` instance ready to run, or an error if
    /// initialization failed.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        apply_overrides(&mut config, args);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        } else {
            info!("✅ Configuration loaded and validated successfully");
        }

        display_banner();

        let node = DirectoryNode::new(config.to_directory_config()?);
        Ok(Self { config, node })
    }

    /// Runs the node until a termination signal arrives, then shuts it down.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting session directory node");
        self.log_configuration_summary();

        let listen_addr = self.node.start().await?;

        let monitoring_handle = {
            let gateway = self.node.gateway().clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                let mut last_replications = 0u64;

                loop {
                    interval.tick().await;

                    let stats = gateway.stats().await;
                    let replications_this_period =
                        stats.replication.replications.saturating_sub(last_replications);
                    last_replications = stats.replication.replications;

                    info!(
                        "📊 Directory Health - {} hosts connected | {} broken | {} sessions | {} players | {} replications/min",
                        stats.hosts_connected,
                        stats.hosts_broken,
                        stats.sessions,
                        stats.players,
                        replications_this_period
                    );

                    if stats.hosts_broken > 0 {
                        warn!(
                            "🔌 {} host(s) unreachable, retrying until their context expires",
                            stats.hosts_broken
                        );
                    }
                }
            })
        };

        info!("✅ Directory node is now running!");
        if let Some(addr) = listen_addr {
            info!("🎮 Accepting session host links on ws://{}", addr);
        }
        info!("🔍 Health monitoring active - stats every 60 seconds");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let signal_shutdown_state = setup_signal_handlers().await?;

        // merciless shutdown
        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }

            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        let shutdown_state = self.node.shutdown_state();
        if signal_shutdown_state.is_shutdown_initiated() {
            shutdown_state.initiate_shutdown();
        }

        info!("📡 Phase 1: Stopping monitoring and host link acceptance...");
        monitoring_handle.abort();

        info!("⏳ Phase 2: Waiting for links, supervisors and the sweeper to stop...");
        self.node.join(SHUTDOWN_GRACE).await;
        shutdown_state.complete_shutdown();

        log_final_statistics(&self.node.gateway().stats().await);

        info!("✅ Directory node shutdown complete");
        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!(
            "  ⏱️ Context TTL: {}s | retry every {}ms",
            self.config.replication.context_ttl_secs,
            self.config.replication.connect_retry_interval_ms
        );
        info!("  📞 Seed hosts: {}", self.config.hosts.len());
        for host in &self.config.hosts {
            info!("    - {}", host.address);
        }
    }
}

/// Merges command-line overrides into the loaded configuration.
fn apply_overrides(config: &mut AppConfig, args: CliArgs) {
    if let Some(bind_address) = args.bind_address {
        config.server.bind_address = bind_address;
    }

    if let Some(log_level) = args.log_level {
        config.logging.level = log_level;
    }

    if args.json_logs {
        config.logging.json_format = true;
    }

    for address in args.hosts {
        if !config.hosts.iter().any(|h| h.address == address) {
            config.hosts.push(HostSettings { address });
        }
    }
}

/// Logs final statistics during shutdown.
fn log_final_statistics(stats: &DirectoryStats) {
    info!("📊 Final Statistics:");
    info!("  - Replications applied: {}", stats.replication.replications);
    info!("  - Hosts expired: {}", stats.replication.expiries);
    info!("  - Link losses: {}", stats.replication.link_losses);
    info!(
        "  - Lobby updates: {} sent, {} suppressed",
        stats.lobby_updates_emitted, stats.lobby_updates_suppressed
    );
}
