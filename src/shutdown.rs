//! Signal and shutdown coordination.
//!
//! One process-wide cancellation token is wired to SIGINT and SIGTERM. The
//! first signal cancels the token and lets the supervisor drain; a second
//! signal during the drain exits 130 immediately, skipping the container
//! stack stop. No other component installs a signal handler.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit code for a forced exit on the second signal.
pub const EXIT_SECOND_SIGNAL: i32 = 130;

/// Install the signal watcher and return the root cancellation token.
///
/// # Errors
///
/// The underlying I/O error when a signal handler cannot be registered;
/// callers treat this as fatal.
pub fn install() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let root = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!(signal = "SIGINT", "termination signal received, draining"),
            _ = terminate.recv() => info!(signal = "SIGTERM", "termination signal received, draining"),
        }
        root.cancel();

        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        warn!("second termination signal, exiting immediately");
        std::process::exit(EXIT_SECOND_SIGNAL);
    });

    Ok(token)
}
