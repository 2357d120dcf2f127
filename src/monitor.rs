//! # ResourceMonitor — host CPU/RAM sampling and throttle computation
//!
//! ## Responsibility
//! Sample whole-host CPU and RAM utilization at a fixed cadence, derive the
//! advisory throttle level from the configured thresholds, and publish all
//! three values into shared state.
//!
//! ## Guarantees
//! - Host-wide: samples come from OS counters, not a per-process rollup
//! - Delta-aware: the first CPU sample is not a valid delta, so the first
//!   tick always publishes throttle level 0
//! - Retaining: a failed sample keeps the previous published values
//!
//! ## NOT Responsible For
//! - Acting on the throttle level (collaborators observe it)
//! - Restarting itself (the supervisor watches the heartbeat)

use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::System;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::state::{SharedState, WorkerName};

/// RAM percentage above which a best-effort allocator trim is requested.
const TRIM_RAM_THRESHOLD: f64 = 65.0;

/// Minimum spacing between allocator trims.
const TRIM_HOLDDOWN: Duration = Duration::from_secs(30);

/// Map a utilization percentage onto a throttle level using the three
/// configured thresholds. Level boundaries are inclusive: usage exactly at
/// `t1` is level 1, at `t2` level 2, at `t3` level 3.
pub fn throttle_level(max_usage: f64, t1: f64, t2: f64, t3: f64) -> u8 {
    if max_usage >= t3 {
        3
    } else if max_usage >= t2 {
        2
    } else if max_usage >= t1 {
        1
    } else {
        0
    }
}

/// Host resource sampler. One instance runs per supervised monitor task.
pub struct ResourceMonitor {
    config: Arc<AgentConfig>,
    state: Arc<SharedState>,
}

impl ResourceMonitor {
    pub fn new(config: Arc<AgentConfig>, state: Arc<SharedState>) -> Self {
        Self { config, state }
    }

    /// Sampling loop. Runs until `cancel` fires; each tick touches the
    /// monitor heartbeat so the supervisor can detect a stall.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.workers.sample_interval_secs,
            "resource monitor started"
        );

        let mut sys = System::new();
        let mut first_sample = true;
        let mut last_trim: Option<Instant> = None;
        let interval = self.config.sample_interval();

        loop {
            self.state.touch_heartbeat(WorkerName::Monitor);

            match self.sample(&mut sys) {
                Some((cpu, ram)) => {
                    // The first CPU reading has no previous counter to delta
                    // against; publish zero and let the next tick carry a
                    // real value.
                    let cpu = if first_sample { 0.0 } else { cpu };
                    let level = if first_sample {
                        0
                    } else {
                        let r = &self.config.resources;
                        throttle_level(cpu.max(ram), r.throttle_t1, r.throttle_t2, r.throttle_t3)
                    };
                    first_sample = false;

                    self.state.set_cpu_percent(cpu);
                    self.state.set_ram_percent(ram);
                    self.state.set_throttle_level(level);

                    if level > 0 {
                        warn!(
                            cpu_percent = format_args!("{cpu:.1}"),
                            ram_percent = format_args!("{ram:.1}"),
                            throttle = level,
                            "resource pressure detected"
                        );
                    } else {
                        debug!(
                            cpu_percent = format_args!("{cpu:.1}"),
                            ram_percent = format_args!("{ram:.1}"),
                            "resources ok"
                        );
                    }

                    let r = &self.config.resources;
                    if cpu > r.max_cpu_percent || ram > r.max_ram_percent {
                        error!(
                            cpu_percent = format_args!("{cpu:.1}"),
                            max_cpu = r.max_cpu_percent,
                            ram_percent = format_args!("{ram:.1}"),
                            max_ram = r.max_ram_percent,
                            "resource ceiling exceeded"
                        );
                    }

                    if ram >= TRIM_RAM_THRESHOLD
                        && last_trim.map_or(true, |t| t.elapsed() >= TRIM_HOLDDOWN)
                    {
                        info!(
                            ram_percent = format_args!("{ram:.1}"),
                            "requesting allocator trim due to high RAM usage"
                        );
                        request_memory_compaction();
                        last_trim = Some(Instant::now());
                    }
                }
                None => {
                    // Keep the previous published values; the next tick
                    // retries.
                    self.state.incr_sample_errors();
                    warn!("host sampling failed, retaining previous values");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        info!("resource monitor stopped");
    }

    /// One host sample. Returns `(cpu_percent, ram_percent)`, or `None`
    /// when the OS counters are unreadable.
    fn sample(&self, sys: &mut System) -> Option<(f64, f64)> {
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let total = sys.total_memory();
        if total == 0 {
            return None;
        }

        let cpu = f64::from(sys.global_cpu_usage()).clamp(0.0, 100.0);
        let ram = (sys.used_memory() as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
        Some((cpu, ram))
    }
}

/// Ask the allocator to return freed pages to the OS. Only glibc exposes a
/// hook for this; elsewhere this is a no-op.
fn request_memory_compaction() {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    // SAFETY: malloc_trim only walks the allocator's own free lists.
    unsafe {
        libc::malloc_trim(0);
    }
}
