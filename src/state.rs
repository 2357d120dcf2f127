//! # SharedState — the in-process observation store
//!
//! ## Responsibility
//! Hold the fixed set of typed slots every component observes: resource
//! samples, probe outcomes, the bring-up phase, and per-worker liveness
//! bookkeeping. This is the only channel between workers.
//!
//! ## Guarantees
//! - Lock-free: every slot is an independent atomic; reads never block writers
//! - Tear-free: each slot is read and written as a single atomic word
//! - Single-writer: each slot has exactly one designated writing component
//!
//! ## NOT Responsible For
//! - Cross-slot snapshot consistency (metrics treats values as point samples)
//! - Notifying readers of changes (there are no subscriptions)

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bring-up phase, steady-state, and shutdown states of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Credential and cluster-metadata verification.
    A = 0,
    /// Rendering of the sniffer and shipper configuration files.
    B = 1,
    /// Container stack start and health wait.
    C = 2,
    /// Downstream reachability verification.
    D = 3,
    /// End-to-end pipeline verification.
    E = 4,
    /// Best-effort change capture of rendered configs.
    F = 5,
    /// Worker spawn, entry into the supervision loop.
    G = 6,
    /// Workers running, awaiting a termination signal.
    Steady = 7,
    /// Termination signal received, workers draining.
    Draining = 8,
    /// Drain complete, process about to exit.
    Stopped = 9,
}

impl Phase {
    /// Stable lowercase name used in logs and the health endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::A => "a",
            Phase::B => "b",
            Phase::C => "c",
            Phase::D => "d",
            Phase::E => "e",
            Phase::F => "f",
            Phase::G => "g",
            Phase::Steady => "steady",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
        }
    }

    fn from_code(code: u8) -> Phase {
        match code {
            0 => Phase::A,
            1 => Phase::B,
            2 => Phase::C,
            3 => Phase::D,
            4 => Phase::E,
            5 => Phase::F,
            6 => Phase::G,
            7 => Phase::Steady,
            8 => Phase::Draining,
            _ => Phase::Stopped,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed set of supervised workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerName {
    /// Host CPU/RAM sampler.
    Monitor,
    /// DNS/TLS/cluster reachability prober.
    Prober,
    /// Metrics HTTP endpoint.
    Metrics,
}

impl WorkerName {
    /// All supervised workers, in spawn order.
    pub const ALL: [WorkerName; 3] = [WorkerName::Monitor, WorkerName::Prober, WorkerName::Metrics];

    /// Stable name used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerName::Monitor => "monitor",
            WorkerName::Prober => "prober",
            WorkerName::Metrics => "metrics",
        }
    }

    fn index(self) -> usize {
        match self {
            WorkerName::Monitor => 0,
            WorkerName::Prober => 1,
            WorkerName::Metrics => 2,
        }
    }
}

impl std::fmt::Display for WorkerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-worker liveness bookkeeping. Written by the supervisor (alive,
/// restarts) and by the worker itself (heartbeat).
#[derive(Debug, Default)]
struct WorkerSlot {
    alive: AtomicBool,
    restarts: AtomicU64,
    heartbeat_ms: AtomicU64,
}

/// Lock-free store of everything the agent observes about itself.
///
/// Created once at startup, shared as `Arc<SharedState>`, discarded at exit.
/// Every slot has a defined initial value before any worker starts.
#[derive(Debug)]
pub struct SharedState {
    cpu_percent: AtomicU64,
    ram_percent: AtomicU64,
    throttle_level: AtomicU8,
    dns_ok: AtomicBool,
    tls_ok: AtomicBool,
    cluster_ok: AtomicBool,
    cluster_latency_ms: AtomicU64,
    phase: AtomicU8,
    pipeline_ok: AtomicBool,
    workers: [WorkerSlot; 3],
    sample_errors: AtomicU64,
    coalesced_cycles: AtomicU64,
    started_at_epoch_secs: u64,
}

impl SharedState {
    /// Create the store with every slot at its initial value.
    pub fn new() -> Self {
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            cpu_percent: AtomicU64::new(0f64.to_bits()),
            ram_percent: AtomicU64::new(0f64.to_bits()),
            throttle_level: AtomicU8::new(0),
            dns_ok: AtomicBool::new(false),
            tls_ok: AtomicBool::new(false),
            cluster_ok: AtomicBool::new(false),
            cluster_latency_ms: AtomicU64::new(0f64.to_bits()),
            phase: AtomicU8::new(Phase::A as u8),
            pipeline_ok: AtomicBool::new(false),
            workers: Default::default(),
            sample_errors: AtomicU64::new(0),
            coalesced_cycles: AtomicU64::new(0),
            started_at_epoch_secs: started,
        }
    }

    // ── Resource samples (writer: monitor) ─────────────────────────────

    pub fn set_cpu_percent(&self, v: f64) {
        self.cpu_percent.store(v.to_bits(), Ordering::Relaxed);
    }

    pub fn cpu_percent(&self) -> f64 {
        f64::from_bits(self.cpu_percent.load(Ordering::Relaxed))
    }

    pub fn set_ram_percent(&self, v: f64) {
        self.ram_percent.store(v.to_bits(), Ordering::Relaxed);
    }

    pub fn ram_percent(&self) -> f64 {
        f64::from_bits(self.ram_percent.load(Ordering::Relaxed))
    }

    pub fn set_throttle_level(&self, level: u8) {
        self.throttle_level.store(level, Ordering::Relaxed);
    }

    pub fn throttle_level(&self) -> u8 {
        self.throttle_level.load(Ordering::Relaxed)
    }

    pub fn incr_sample_errors(&self) {
        self.sample_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sample_errors(&self) -> u64 {
        self.sample_errors.load(Ordering::Relaxed)
    }

    // ── Probe outcomes (writer: prober) ────────────────────────────────

    pub fn set_dns_ok(&self, ok: bool) {
        self.dns_ok.store(ok, Ordering::Relaxed);
    }

    pub fn dns_ok(&self) -> bool {
        self.dns_ok.load(Ordering::Relaxed)
    }

    pub fn set_tls_ok(&self, ok: bool) {
        self.tls_ok.store(ok, Ordering::Relaxed);
    }

    pub fn tls_ok(&self) -> bool {
        self.tls_ok.load(Ordering::Relaxed)
    }

    pub fn set_cluster_ok(&self, ok: bool) {
        self.cluster_ok.store(ok, Ordering::Relaxed);
    }

    pub fn cluster_ok(&self) -> bool {
        self.cluster_ok.load(Ordering::Relaxed)
    }

    pub fn set_cluster_latency_ms(&self, v: f64) {
        self.cluster_latency_ms.store(v.to_bits(), Ordering::Relaxed);
    }

    pub fn cluster_latency_ms(&self) -> f64 {
        f64::from_bits(self.cluster_latency_ms.load(Ordering::Relaxed))
    }

    pub fn incr_coalesced_cycles(&self) {
        self.coalesced_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn coalesced_cycles(&self) -> u64 {
        self.coalesced_cycles.load(Ordering::Relaxed)
    }

    /// True when the most recent probe cycle succeeded on all three checks.
    pub fn all_probes_ok(&self) -> bool {
        self.dns_ok() && self.tls_ok() && self.cluster_ok()
    }

    // ── Phase and pipeline health (writer: state machine / supervisor) ─

    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn phase(&self) -> Phase {
        Phase::from_code(self.phase.load(Ordering::Relaxed))
    }

    pub fn set_pipeline_ok(&self, ok: bool) {
        self.pipeline_ok.store(ok, Ordering::Relaxed);
    }

    pub fn pipeline_ok(&self) -> bool {
        self.pipeline_ok.load(Ordering::Relaxed)
    }

    // ── Worker bookkeeping ─────────────────────────────────────────────

    pub fn set_worker_alive(&self, worker: WorkerName, alive: bool) {
        self.workers[worker.index()].alive.store(alive, Ordering::Relaxed);
    }

    pub fn worker_alive(&self, worker: WorkerName) -> bool {
        self.workers[worker.index()].alive.load(Ordering::Relaxed)
    }

    pub fn incr_worker_restarts(&self, worker: WorkerName) -> u64 {
        self.workers[worker.index()].restarts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn worker_restarts(&self, worker: WorkerName) -> u64 {
        self.workers[worker.index()].restarts.load(Ordering::Relaxed)
    }

    /// Record a heartbeat for `worker` at the current wall-clock time.
    /// Each worker touches its own slot once per tick or cycle.
    pub fn touch_heartbeat(&self, worker: WorkerName) {
        self.workers[worker.index()]
            .heartbeat_ms
            .store(Self::now_ms(), Ordering::Relaxed);
    }

    /// Milliseconds since the worker's last heartbeat, or `u64::MAX` if the
    /// worker never heartbeat.
    pub fn heartbeat_age_ms(&self, worker: WorkerName) -> u64 {
        let last = self.workers[worker.index()].heartbeat_ms.load(Ordering::Relaxed);
        if last == 0 {
            return u64::MAX;
        }
        Self::now_ms().saturating_sub(last)
    }

    // ── Process identity ───────────────────────────────────────────────

    /// Unix timestamp (seconds) at which the store was created.
    pub fn started_at_epoch_secs(&self) -> u64 {
        self.started_at_epoch_secs
    }

    /// Seconds elapsed since the store was created.
    pub fn uptime_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(self.started_at_epoch_secs)
            .saturating_sub(self.started_at_epoch_secs)
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
