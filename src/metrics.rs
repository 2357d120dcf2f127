//! Prometheus metrics for the agent.
//!
//! All gauges are derived from shared state at scrape time; there is no
//! background refresh loop and no global registry. The bundle is owned by
//! the metrics endpoint worker and rebuilt if that worker restarts.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `ids2_cpu_usage_percent` | Gauge | |
//! | `ids2_ram_usage_percent` | Gauge | |
//! | `ids2_throttle_level` | Gauge | |
//! | `ids2_dns_status` | Gauge | |
//! | `ids2_tls_status` | Gauge | |
//! | `ids2_opensearch_status` | Gauge | |
//! | `ids2_pipeline_ok` | Gauge | |
//! | `ids2_phase` | Gauge | |
//! | `ids2_cluster_latency_ms` | Gauge | |
//! | `ids2_uptime_seconds` | Gauge | |
//! | `ids2_worker_alive` | Gauge | `name` |
//! | `ids2_worker_restarts_total` | Gauge | `name` |
//! | `ids2_sample_errors_total` | Gauge | |
//! | `ids2_coalesced_cycles_total` | Gauge | |
//!
//! Booleans are emitted as 0 or 1. The `_total` series mirror counters the
//! workers maintain in shared state; they are exported as gauges because
//! the authoritative count lives outside the registry.

use prometheus::{Encoder, Gauge, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::state::{SharedState, WorkerName};

/// All Prometheus metric handles, bundled with the registry that owns them.
pub struct AgentMetrics {
    registry: Registry,
    cpu_usage: Gauge,
    ram_usage: Gauge,
    throttle_level: IntGauge,
    dns_status: IntGauge,
    tls_status: IntGauge,
    opensearch_status: IntGauge,
    pipeline_ok: IntGauge,
    phase: IntGauge,
    cluster_latency_ms: Gauge,
    uptime_seconds: IntGauge,
    worker_alive: IntGaugeVec,
    worker_restarts: IntGaugeVec,
    sample_errors: IntGauge,
    coalesced_cycles: IntGauge,
}

impl AgentMetrics {
    /// Construct all metric descriptors and register them.
    ///
    /// # Errors
    ///
    /// Returns the underlying `prometheus::Error` on duplicate descriptors
    /// or invalid names; with the fixed set below that indicates a bug.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cpu_usage = Gauge::with_opts(Opts::new(
            "ids2_cpu_usage_percent",
            "Current CPU usage percentage",
        ))?;
        registry.register(Box::new(cpu_usage.clone()))?;

        let ram_usage = Gauge::with_opts(Opts::new(
            "ids2_ram_usage_percent",
            "Current RAM usage percentage",
        ))?;
        registry.register(Box::new(ram_usage.clone()))?;

        let throttle_level = IntGauge::with_opts(Opts::new(
            "ids2_throttle_level",
            "Current throttling level (0-3)",
        ))?;
        registry.register(Box::new(throttle_level.clone()))?;

        let dns_status = IntGauge::with_opts(Opts::new(
            "ids2_dns_status",
            "DNS connectivity status (1=ok, 0=fail)",
        ))?;
        registry.register(Box::new(dns_status.clone()))?;

        let tls_status = IntGauge::with_opts(Opts::new(
            "ids2_tls_status",
            "TLS connectivity status (1=ok, 0=fail)",
        ))?;
        registry.register(Box::new(tls_status.clone()))?;

        let opensearch_status = IntGauge::with_opts(Opts::new(
            "ids2_opensearch_status",
            "OpenSearch connectivity status (1=ok, 0=fail)",
        ))?;
        registry.register(Box::new(opensearch_status.clone()))?;

        let pipeline_ok = IntGauge::with_opts(Opts::new(
            "ids2_pipeline_ok",
            "Overall pipeline health (1=ok, 0=degraded)",
        ))?;
        registry.register(Box::new(pipeline_ok.clone()))?;

        let phase = IntGauge::with_opts(Opts::new(
            "ids2_phase",
            "Bring-up phase (0-6=A-G, 7=steady, 8=draining, 9=stopped)",
        ))?;
        registry.register(Box::new(phase.clone()))?;

        let cluster_latency_ms = Gauge::with_opts(Opts::new(
            "ids2_cluster_latency_ms",
            "Latency of the most recent cluster bulk ping",
        ))?;
        registry.register(Box::new(cluster_latency_ms.clone()))?;

        let uptime_seconds = IntGauge::with_opts(Opts::new(
            "ids2_uptime_seconds",
            "Seconds since agent start",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let worker_alive = IntGaugeVec::new(
            Opts::new("ids2_worker_alive", "Worker liveness (1=alive, 0=down)"),
            &["name"],
        )?;
        registry.register(Box::new(worker_alive.clone()))?;

        let worker_restarts = IntGaugeVec::new(
            Opts::new("ids2_worker_restarts_total", "Total restarts per worker"),
            &["name"],
        )?;
        registry.register(Box::new(worker_restarts.clone()))?;

        let sample_errors = IntGauge::with_opts(Opts::new(
            "ids2_sample_errors_total",
            "Total failed host samples",
        ))?;
        registry.register(Box::new(sample_errors.clone()))?;

        let coalesced_cycles = IntGauge::with_opts(Opts::new(
            "ids2_coalesced_cycles_total",
            "Total probe ticks skipped because the previous cycle was still running",
        ))?;
        registry.register(Box::new(coalesced_cycles.clone()))?;

        Ok(Self {
            registry,
            cpu_usage,
            ram_usage,
            throttle_level,
            dns_status,
            tls_status,
            opensearch_status,
            pipeline_ok,
            phase,
            cluster_latency_ms,
            uptime_seconds,
            worker_alive,
            worker_restarts,
            sample_errors,
            coalesced_cycles,
        })
    }

    /// Load every gauge from shared state. Each slot is read independently;
    /// the result is a point sample, not a consistent snapshot.
    pub fn refresh(&self, state: &SharedState) {
        self.cpu_usage.set(state.cpu_percent());
        self.ram_usage.set(state.ram_percent());
        self.throttle_level.set(i64::from(state.throttle_level()));
        self.dns_status.set(i64::from(state.dns_ok()));
        self.tls_status.set(i64::from(state.tls_ok()));
        self.opensearch_status.set(i64::from(state.cluster_ok()));
        self.pipeline_ok.set(i64::from(state.pipeline_ok()));
        self.phase.set(state.phase() as i64);
        self.cluster_latency_ms.set(state.cluster_latency_ms());
        self.uptime_seconds.set(state.uptime_secs() as i64);
        self.sample_errors.set(state.sample_errors() as i64);
        self.coalesced_cycles.set(state.coalesced_cycles() as i64);

        for worker in WorkerName::ALL {
            self.worker_alive
                .with_label_values(&[worker.as_str()])
                .set(i64::from(state.worker_alive(worker)));
            self.worker_restarts
                .with_label_values(&[worker.as_str()])
                .set(state.worker_restarts(worker) as i64);
        }
    }

    /// Refresh from `state` and encode the registry in the Prometheus text
    /// exposition format. Encoding failures degrade to an empty payload
    /// rather than an error; the scrape target stays up.
    pub fn render(&self, state: &SharedState) -> String {
        self.refresh(state);
        let families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
