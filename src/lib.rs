//! # ids2-agent
//!
//! Edge supervisor agent for the IDS2 SOC pipeline. The agent brings up,
//! verifies, and continuously maintains a local network-intrusion-detection
//! data pipeline on a single constrained host: a packet sniffer writing
//! NDJSON into a RAM-backed file, a log-shipper container forwarding to a
//! remote search cluster, and the supporting container stack.
//!
//! The agent orchestrates; it never transports or transforms log records.
//!
//! ## Architecture
//!
//! ```text
//! main ──► bring-up state machine (A…F) ──► supervisor (G, steady state)
//!              │                                │
//!              │ orchestrator (compose, render) ├── monitor  ─┐
//!              │ cluster client (metadata)      ├── prober   ─┼─► SharedState
//!              │                                └── metrics  ─┘      │
//!              └────────────── signals ──► CancellationToken   /metrics, /health
//! ```
//!
//! Workers communicate exclusively through [`state::SharedState`]; the
//! supervisor restarts crashed or stalled workers with backoff; a single
//! cancellation token drives ordered shutdown.

pub mod capture;
pub mod config;
pub mod metrics;
pub mod metrics_server;
pub mod monitor;
pub mod orchestrator;
pub mod phases;
pub mod prober;
pub mod retry;
pub mod shutdown;
pub mod state;
pub mod supervisor;
pub mod template;

// Re-exports for the binary and integration tests.
pub use config::{loader::load_from_file, AgentConfig};
pub use phases::{BringUpMachine, BringUpOutcome, PhaseError};
pub use state::{Phase, SharedState, WorkerName};
pub use supervisor::Supervisor;

use crate::config::LogFormat;

/// Initialise tracing with env-filter support. Call once at binary startup,
/// after configuration is loaded (the log format is a config option).
pub fn init_tracing(format: &LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing(&LogFormat::Pretty);
        init_tracing(&LogFormat::Json);
    }
}
