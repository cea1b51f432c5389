//! Termination signals for the directory node.
//!
//! The first SIGINT/SIGTERM (Ctrl+C on Windows) flips a [`ShutdownState`] that
//! the listener, the seed diallers, every host supervisor and the expiry
//! sweeper watch. [`crate::app::Application`] then listens once more with
//! [`setup_signal_handlers_silent`] and exits hard on the second signal.

use session_directory::ShutdownState;
use tokio::signal;
use tracing::info;

/// Blocks until the operator asks the node to stop.
///
/// Host contexts are not persisted, so nothing is flushed here: once the
/// returned state is propagated to the node, host links simply close and the
/// hosts re-handshake with whichever directory comes up next.
pub async fn setup_signal_handlers() -> Result<ShutdownState, Box<dyn std::error::Error>> {
    let shutdown_state = setup_signal_handlers_silent().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");
    Ok(shutdown_state)
}

/// Same as [`setup_signal_handlers`] without the log line; used for the forced-exit watcher.
pub async fn setup_signal_handlers_silent() -> Result<ShutdownState, Box<dyn std::error::Error>> {
    let shutdown_state = ShutdownState::new();

    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    shutdown_state.initiate_shutdown();
    Ok(shutdown_state)
}
