//! # Supervisor — worker lifecycle and steady-state loop
//!
//! ## Responsibility
//! Own the three workers after bring-up: spawn them, watch task liveness
//! and heartbeats, restart crashed or stalled workers with backoff, keep
//! `pipeline_ok` current, and drain everything on shutdown.
//!
//! ## Guarantees
//! - Detecting: a terminated task or a stale heartbeat is noticed within
//!   one poll interval (1 s)
//! - Unbounded: restarts never cap out; backoff grows 1 s → 30 s and resets
//!   after five minutes of continuous life
//! - Counted: `worker_restarts` increments exactly once per restart
//! - Draining: on cancellation all workers are joined within the grace
//!   period; stragglers are aborted
//!
//! ## NOT Responsible For
//! - Bring-up (see: phases)
//! - Signal handling (see: shutdown)
//! - What the workers actually do

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AgentConfig;
use crate::state::{Phase, SharedState, WorkerName};

/// Liveness and status-log poll interval.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Spacing of the structured status line.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// First restart backoff step.
const RESTART_BASE: Duration = Duration::from_secs(1);

/// Restart backoff ceiling.
const RESTART_CAP: Duration = Duration::from_secs(30);

/// Continuous lifetime after which the backoff resets to the base.
const BACKOFF_RESET_AFTER: Duration = Duration::from_secs(300);

/// Builds a fresh task for a worker. Called on initial spawn and on every
/// restart with a new child cancellation token.
pub type WorkerFactory = Box<dyn Fn(CancellationToken) -> JoinHandle<()> + Send + Sync>;

struct Supervised {
    name: WorkerName,
    liveness_timeout: Duration,
    factory: WorkerFactory,
    handle: Option<JoinHandle<()>>,
    child_cancel: CancellationToken,
    started: Instant,
    backoff_step: u32,
    restart_at: Option<Instant>,
}

impl Supervised {
    fn next_backoff(&mut self) -> Duration {
        if self.started.elapsed() >= BACKOFF_RESET_AFTER {
            self.backoff_step = 0;
        }
        let delay = RESTART_BASE
            .saturating_mul(2u32.saturating_pow(self.backoff_step))
            .min(RESTART_CAP);
        self.backoff_step += 1;
        // Spread simultaneous restarts out a little.
        let jitter = rand::thread_rng().gen_range(0..250);
        delay + Duration::from_millis(jitter)
    }
}

/// Supervises the fixed worker set from phase G until shutdown.
pub struct Supervisor {
    config: Arc<AgentConfig>,
    state: Arc<SharedState>,
    workers: Vec<Supervised>,
}

impl Supervisor {
    pub fn new(config: Arc<AgentConfig>, state: Arc<SharedState>) -> Self {
        Self {
            config,
            state,
            workers: Vec::new(),
        }
    }

    /// Register a worker. A stale heartbeat older than `liveness_timeout`
    /// counts as a crash.
    pub fn add_worker(
        &mut self,
        name: WorkerName,
        liveness_timeout: Duration,
        factory: WorkerFactory,
    ) {
        self.workers.push(Supervised {
            name,
            liveness_timeout,
            factory,
            handle: None,
            child_cancel: CancellationToken::new(),
            started: Instant::now(),
            backoff_step: 0,
            restart_at: None,
        });
    }

    /// Phase G and the steady-state loop. Spawns all workers, polls
    /// liveness once a second, restarts with backoff, logs a status line
    /// every 30 s, and drains on cancellation.
    pub async fn run(mut self, cancel: CancellationToken) {
        self.state.set_phase(Phase::G);
        info!(phase = "g", workers = self.workers.len(), "spawning workers");

        for worker in &mut self.workers {
            let child = cancel.child_token();
            worker.child_cancel = child.clone();
            worker.handle = Some((worker.factory)(child));
            worker.started = Instant::now();
            self.state.set_worker_alive(worker.name, true);
        }

        self.state.set_phase(Phase::Steady);
        info!(phase = "steady", "entering supervision loop");

        let mut last_status_log = Instant::now();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => break,
            }

            self.poll_workers(&cancel);

            // pipeline_ok holds exactly while the pipeline is steady and
            // the most recent probe cycle was fully green.
            self.state
                .set_pipeline_ok(self.state.phase() == Phase::Steady && self.state.all_probes_ok());

            if last_status_log.elapsed() >= STATUS_LOG_INTERVAL {
                last_status_log = Instant::now();
                self.log_status();
            }
        }

        self.drain().await;
    }

    /// One liveness pass over every worker. Replacement tasks get a fresh
    /// child of the root token so shutdown still reaches them.
    fn poll_workers(&mut self, root: &CancellationToken) {
        for worker in &mut self.workers {
            // A restart is already scheduled; fire it when due.
            if let Some(due) = worker.restart_at {
                if Instant::now() >= due {
                    let child = worker.child_cancel.clone();
                    worker.handle = Some((worker.factory)(child));
                    worker.started = Instant::now();
                    worker.restart_at = None;
                    self.state.set_worker_alive(worker.name, true);
                    info!(worker = %worker.name, "worker restarted");
                }
                continue;
            }

            let crashed_reason = match &worker.handle {
                Some(handle) if handle.is_finished() => Some("task terminated"),
                Some(_) => {
                    // A freshly (re)spawned worker gets one liveness window
                    // before its heartbeat is judged.
                    let age_ms = self.state.heartbeat_age_ms(worker.name);
                    if age_ms > worker.liveness_timeout.as_millis() as u64
                        && worker.started.elapsed() > worker.liveness_timeout
                    {
                        Some("stale heartbeat")
                    } else {
                        None
                    }
                }
                None => Some("task terminated"),
            };

            if let Some(reason) = crashed_reason {
                // Tear the old task down completely before scheduling the
                // replacement.
                worker.child_cancel.cancel();
                if let Some(handle) = worker.handle.take() {
                    handle.abort();
                }
                worker.child_cancel = root.child_token();

                self.state.set_worker_alive(worker.name, false);
                let restarts = self.state.incr_worker_restarts(worker.name);
                let delay = worker.next_backoff();
                worker.restart_at = Some(Instant::now() + delay);

                error!(
                    worker = %worker.name,
                    reason,
                    restarts,
                    backoff_ms = delay.as_millis() as u64,
                    "worker crashed, scheduling restart"
                );
            }
        }
    }

    /// Structured status line: phase, pipeline health, throttle, per-worker
    /// liveness and restart counts.
    fn log_status(&self) {
        let state = &self.state;
        let workers: Vec<String> = self
            .workers
            .iter()
            .map(|w| {
                format!(
                    "{}={}:{}",
                    w.name,
                    if state.worker_alive(w.name) { "up" } else { "down" },
                    state.worker_restarts(w.name)
                )
            })
            .collect();
        info!(
            phase = %state.phase(),
            pipeline_ok = state.pipeline_ok(),
            throttle = state.throttle_level(),
            cpu_percent = format_args!("{:.1}", state.cpu_percent()),
            ram_percent = format_args!("{:.1}", state.ram_percent()),
            workers = %workers.join(" "),
            "status"
        );
    }

    /// Cancel all workers and join them within the shutdown grace period.
    /// Anything still running afterwards is aborted and abandoned.
    async fn drain(mut self) {
        self.state.set_phase(Phase::Draining);
        self.state.set_pipeline_ok(false);
        info!(
            phase = "draining",
            grace_secs = self.config.policy.shutdown_grace_secs,
            "draining workers"
        );

        for worker in &self.workers {
            worker.child_cancel.cancel();
        }

        let deadline = Instant::now() + self.config.shutdown_grace();
        for worker in &mut self.workers {
            if let Some(mut handle) = worker.handle.take() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match tokio::time::timeout(remaining, &mut handle).await {
                    Ok(_) => info!(worker = %worker.name, "worker drained"),
                    Err(_) => {
                        error!(worker = %worker.name, "worker did not drain in time, aborting");
                        handle.abort();
                    }
                }
            }
            self.state.set_worker_alive(worker.name, false);
        }

        info!("all workers stopped");
    }
}
