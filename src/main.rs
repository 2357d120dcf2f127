//! # ids2-agent binary
//!
//! Loads configuration, runs the bring-up state machine, then supervises
//! the workers until a termination signal.
//!
//! ## Usage
//!
//! ```bash
//! # Normal operation
//! ids2-agent --config /etc/ids2/agent.toml
//!
//! # Verify configuration and phases without touching the container stack
//! ids2-agent --config agent.toml --dry-run
//!
//! # Print the configuration JSON Schema (IDE autocomplete)
//! ids2-agent --schema
//! ```
//!
//! ## Exit codes
//!
//! | code | meaning |
//! |------|---------|
//! | 0 | normal shutdown |
//! | 1 | fatal error (metrics bind, signal handlers) |
//! | 2 | configuration error |
//! | 3–7 | bring-up phase A–E failure |
//! | 130 | second termination signal during drain |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info};

use ids2_agent::config::{export_schema, loader};
use ids2_agent::monitor::ResourceMonitor;
use ids2_agent::orchestrator::{ComposeOrchestrator, Orchestrator};
use ids2_agent::supervisor::WorkerFactory;
use ids2_agent::{
    init_tracing, metrics_server, shutdown, BringUpMachine, Phase, PhaseError, SharedState,
    Supervisor, WorkerName,
};

/// Liveness threshold for the metrics endpoint worker.
const METRICS_LIVENESS: Duration = Duration::from_secs(60);

/// Parsed CLI arguments.
struct Args {
    /// Path to the TOML configuration file.
    config_path: PathBuf,
    /// Force dry-run regardless of the config file.
    dry_run: bool,
    /// Print the config JSON Schema and exit.
    schema: bool,
}

/// Parse command-line arguments manually (no external arg parser).
fn parse_args() -> Result<Args, String> {
    let argv: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("agent.toml");
    let mut dry_run = false;
    let mut schema = false;

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i >= argv.len() {
                    return Err("--config requires a value".to_string());
                }
                config_path = PathBuf::from(&argv[i]);
            }
            "--dry-run" => {
                dry_run = true;
            }
            "--schema" => {
                schema = true;
            }
            "--help" | "-h" => {
                return Err(usage());
            }
            other => {
                return Err(format!("unknown argument '{other}'\n{}", usage()));
            }
        }
        i += 1;
    }

    Ok(Args {
        config_path,
        dry_run,
        schema,
    })
}

fn usage() -> String {
    "usage: ids2-agent [--config <path>] [--dry-run] [--schema]".to_string()
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };

    if args.schema {
        match export_schema() {
            Ok(schema) => {
                println!("{schema}");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("schema export failed: {e}");
                return ExitCode::from(1);
            }
        }
    }

    // Configuration errors abort before anything else starts.
    let mut config = match loader::load_from_file(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };
    if args.dry_run {
        config.policy.dry_run = true;
    }

    init_tracing(&config.policy.log_format);
    info!(
        config = %args.config_path.display(),
        dry_run = config.policy.dry_run,
        "ids2 agent starting"
    );

    let config = Arc::new(config);
    let state = Arc::new(SharedState::new());

    let cancel = match shutdown::install() {
        Ok(token) => token,
        Err(e) => {
            eprintln!("fatal: cannot register signal handlers: {e}");
            return ExitCode::from(1);
        }
    };

    let orchestrator: Arc<dyn Orchestrator> = Arc::new(ComposeOrchestrator::new(&config));

    // ── Bring-up (phases A–F) ────────────────────────────────────────
    let machine = BringUpMachine::new(
        Arc::clone(&config),
        Arc::clone(&state),
        Arc::clone(&orchestrator),
        cancel.clone(),
    );
    let outcome = match machine.run().await {
        Ok(outcome) => outcome,
        Err(PhaseError::Cancelled) => {
            info!("shutdown requested during bring-up");
            state.set_phase(Phase::Stopped);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!(error = %e, "bring-up failed");
            eprintln!("{e}");
            return ExitCode::from(e.exit_code());
        }
    };

    // ── Metrics listener (bind failure is fatal) ─────────────────────
    // Validation guarantees the bind address parses.
    let metrics_addr: SocketAddr = match config.workers.metrics_bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("fatal: invalid metrics bind address: {e}");
            return ExitCode::from(1);
        }
    };
    let listener = match metrics_server::bind(metrics_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("fatal: cannot bind metrics endpoint on {metrics_addr}: {e}");
            return ExitCode::from(1);
        }
    };

    // ── Phase G: supervision ─────────────────────────────────────────
    let mut supervisor = Supervisor::new(Arc::clone(&config), Arc::clone(&state));

    supervisor.add_worker(
        WorkerName::Monitor,
        config.sample_interval() * 2,
        monitor_factory(Arc::clone(&config), Arc::clone(&state)),
    );
    supervisor.add_worker(
        WorkerName::Prober,
        config.check_interval() * 2,
        prober_factory(Arc::clone(&outcome.prober)),
    );
    supervisor.add_worker(
        WorkerName::Metrics,
        METRICS_LIVENESS,
        metrics_factory(
            listener,
            metrics_addr,
            Arc::clone(&state),
            Duration::from_secs(config.workers.metrics_refresh_secs),
        ),
    );

    supervisor.run(cancel.clone()).await;

    // ── Ordered shutdown tail ────────────────────────────────────────
    if outcome.stack_started && config.policy.stop_stack_on_exit {
        info!("stopping container stack");
        if let Err(e) = orchestrator.compose_down().await {
            error!(error = %e, "container stack stop failed");
        }
    }

    state.set_phase(Phase::Stopped);
    info!(phase = "stopped", "ids2 agent stopped");
    ExitCode::SUCCESS
}

fn monitor_factory(
    config: Arc<ids2_agent::AgentConfig>,
    state: Arc<SharedState>,
) -> WorkerFactory {
    Box::new(move |cancel| {
        let monitor = ResourceMonitor::new(Arc::clone(&config), Arc::clone(&state));
        tokio::spawn(monitor.run(cancel))
    })
}

fn prober_factory(prober: Arc<ids2_agent::prober::ReachabilityProber>) -> WorkerFactory {
    Box::new(move |cancel| tokio::spawn(Arc::clone(&prober).run(cancel)))
}

/// The first spawn consumes the pre-bound listener; restarts rebind. A
/// rebind failure ends the task, which the supervisor counts as a crash
/// and retries with backoff.
fn metrics_factory(
    listener: TcpListener,
    addr: SocketAddr,
    state: Arc<SharedState>,
    heartbeat_interval: Duration,
) -> WorkerFactory {
    let slot = Arc::new(Mutex::new(Some(listener)));
    Box::new(move |cancel| {
        let slot = Arc::clone(&slot);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let held = slot.lock().ok().and_then(|mut guard| guard.take());
            let listener = match held {
                Some(listener) => listener,
                None => match metrics_server::bind(addr).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        error!(error = %e, %addr, "metrics endpoint rebind failed");
                        return;
                    }
                },
            };
            metrics_server::serve(listener, state, heartbeat_interval, cancel).await;
        })
    })
}
