//! # ReachabilityProber — downstream connectivity verification
//!
//! ## Responsibility
//! Run DNS, TLS, and cluster bulk-ping probes against the remote search
//! cluster, concurrently, on a fixed cadence, and publish per-check results
//! into shared state.
//!
//! ## Guarantees
//! - Bounded: every probe attempt carries its own timeout
//! - Retried: each probe gets up to the configured attempts per cycle, with
//!   exponential backoff; a cycle-level failure is written only after all
//!   retries exhaust
//! - Coalesced: cycles never overlap; ticks missed while a cycle runs are
//!   skipped and counted
//! - Cancellable: in-flight probes abort promptly on shutdown
//!
//! ## NOT Responsible For
//! - Transporting log records or signing bulk requests (the shipper owns
//!   the real ingest path; the ping is a near-no-op)
//! - Deciding what a probe failure means (readers consume the `*_ok` slots)

pub mod cluster;
pub mod dns;
pub mod tls;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::retry::RetryPolicy;
use crate::state::{SharedState, WorkerName};
use cluster::ClusterClient;
use tls::TlsProbe;

/// Per-attempt timeout for the DNS probe.
pub const DNS_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-attempt timeout for the TLS probe.
pub const TLS_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-attempt timeout for the cluster bulk ping.
pub const CLUSTER_TIMEOUT: Duration = Duration::from_secs(30);

/// The three checks that make up one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Dns,
    Tls,
    Cluster,
}

impl ProbeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProbeKind::Dns => "dns",
            ProbeKind::Tls => "tls",
            ProbeKind::Cluster => "cluster",
        }
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe failures. Timeouts are folded into the per-probe reason so the
/// retry layer treats them like any other transient failure.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// DNS resolution failed or produced no addresses.
    #[error("dns resolution failed for {domain}: {reason}")]
    Dns { domain: String, reason: String },

    /// TCP connect or TLS handshake failed.
    #[error("tls handshake failed for {domain}: {reason}")]
    Tls { domain: String, reason: String },

    /// Cluster bulk ping failed or returned a non-2xx status.
    #[error("cluster probe failed: {reason}")]
    Cluster { reason: String },

    /// Probe infrastructure could not be built (TLS roots, HTTP client).
    #[error("probe setup failed: {0}")]
    Setup(String),

    /// Shutdown was signaled while the probe was in flight.
    #[error("probe cancelled")]
    Cancelled,
}

/// Result of one completed probe cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub dns_ok: bool,
    pub tls_ok: bool,
    pub cluster_ok: bool,
}

impl CycleOutcome {
    /// True when every check in the cycle succeeded.
    pub fn all_ok(&self) -> bool {
        self.dns_ok && self.tls_ok && self.cluster_ok
    }

    /// The first failing check in DNS → TLS → Cluster order, if any.
    pub fn first_failure(&self) -> Option<ProbeKind> {
        if !self.dns_ok {
            Some(ProbeKind::Dns)
        } else if !self.tls_ok {
            Some(ProbeKind::Tls)
        } else if !self.cluster_ok {
            Some(ProbeKind::Cluster)
        } else {
            None
        }
    }
}

/// Downstream reachability prober. Built once after the cluster endpoint is
/// resolved; driven either one cycle at a time (bring-up) or on a cadence
/// (steady state).
pub struct ReachabilityProber {
    config: Arc<AgentConfig>,
    state: Arc<SharedState>,
    tls: TlsProbe,
    cluster: ClusterClient,
    policy: RetryPolicy,
}

impl ReachabilityProber {
    /// Build the prober against a resolved cluster endpoint.
    ///
    /// # Errors
    ///
    /// [`ProbeError::Setup`] if the TLS root store or HTTP client cannot be
    /// constructed.
    pub fn new(
        config: Arc<AgentConfig>,
        state: Arc<SharedState>,
        endpoint: &str,
    ) -> Result<Self, ProbeError> {
        let tls = TlsProbe::new()?;
        let cluster = ClusterClient::new(endpoint, &config.cluster.index_prefix, CLUSTER_TIMEOUT)?;
        let policy = RetryPolicy::exponential(
            config.policy.retry_attempts,
            Duration::from_secs(config.policy.retry_base_secs),
            Duration::from_secs(config.policy.retry_cap_secs),
        );
        Ok(Self {
            config,
            state,
            tls,
            cluster,
            policy,
        })
    }

    /// Run one full cycle: all three probes concurrently, each with retry,
    /// then write results into shared state in DNS → TLS → Cluster order.
    /// Readers may observe a partially written cycle; `pipeline_ok` is a
    /// conjunction and stabilizes within the cycle.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleOutcome {
        let domain = self.config.cluster.domain.as_str();
        let state = &self.state;

        let dns = self.policy.retry(cancel, || {
            state.touch_heartbeat(WorkerName::Prober);
            with_cancel(cancel, dns::resolve(domain, DNS_TIMEOUT))
        });
        let tls = self.policy.retry(cancel, || {
            state.touch_heartbeat(WorkerName::Prober);
            with_cancel(cancel, self.tls.handshake(domain, TLS_TIMEOUT))
        });
        let bulk = self.policy.retry(cancel, || {
            state.touch_heartbeat(WorkerName::Prober);
            with_cancel(cancel, self.cluster.bulk_ping())
        });

        let (dns_result, tls_result, bulk_result) = tokio::join!(dns, tls, bulk);

        let outcome = CycleOutcome {
            dns_ok: dns_result.is_ok(),
            tls_ok: tls_result.is_ok(),
            cluster_ok: bulk_result.is_ok(),
        };

        self.state.set_dns_ok(outcome.dns_ok);
        self.state.set_tls_ok(outcome.tls_ok);
        self.state.set_cluster_ok(outcome.cluster_ok);
        if let Ok(latency_ms) = bulk_result {
            self.state.set_cluster_latency_ms(latency_ms);
        }

        if outcome.all_ok() {
            info!(
                latency_ms = format_args!("{:.1}", self.state.cluster_latency_ms()),
                "reachability cycle complete: all checks passed"
            );
        } else if !cancel.is_cancelled() {
            warn!(
                dns_ok = outcome.dns_ok,
                tls_ok = outcome.tls_ok,
                cluster_ok = outcome.cluster_ok,
                "reachability cycle complete with failures"
            );
        }

        outcome
    }

    /// Steady-state cadence loop: one cycle per `check_interval`, deadlines
    /// missed while a cycle overruns are skipped and counted.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let interval = self.config.check_interval();
        info!(interval_secs = interval.as_secs(), "reachability prober started");

        let mut next_cycle = Instant::now();
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(next_cycle)) => {}
                _ = cancel.cancelled() => break,
            }

            self.state.touch_heartbeat(WorkerName::Prober);
            self.run_cycle(&cancel).await;
            self.state.touch_heartbeat(WorkerName::Prober);

            if cancel.is_cancelled() {
                break;
            }

            // A cycle that overran its interval has consumed later ticks;
            // skip them rather than running back-to-back cycles.
            let skipped = skipped_ticks(&mut next_cycle, interval, Instant::now());
            for _ in 0..skipped {
                self.state.incr_coalesced_cycles();
            }
            if skipped > 0 {
                warn!(
                    skipped,
                    coalesced_total = self.state.coalesced_cycles(),
                    "probe cycle overran its interval, coalescing ticks"
                );
            }
        }

        info!("reachability prober stopped");
    }
}

/// Move the cycle deadline past `now`, returning how many scheduled ticks
/// the just-finished cycle consumed. Zero when the cycle fit its interval.
fn skipped_ticks(next_cycle: &mut Instant, interval: Duration, now: Instant) -> u64 {
    *next_cycle += interval;
    let mut skipped = 0;
    while now >= *next_cycle {
        *next_cycle += interval;
        skipped += 1;
    }
    skipped
}

/// Race `fut` against cancellation so in-flight probes abort promptly on
/// shutdown.
async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, ProbeError>>,
) -> Result<T, ProbeError> {
    tokio::select! {
        result = fut => result,
        _ = cancel.cancelled() => Err(ProbeError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_fixtures::test_config;

    #[test]
    fn test_cycle_outcome_all_ok() {
        let outcome = CycleOutcome {
            dns_ok: true,
            tls_ok: true,
            cluster_ok: true,
        };
        assert!(outcome.all_ok());
        assert_eq!(outcome.first_failure(), None);
    }

    #[test]
    fn test_cycle_outcome_first_failure_ordering() {
        let dns_fail = CycleOutcome {
            dns_ok: false,
            tls_ok: false,
            cluster_ok: false,
        };
        assert_eq!(dns_fail.first_failure(), Some(ProbeKind::Dns));

        let tls_fail = CycleOutcome {
            dns_ok: true,
            tls_ok: false,
            cluster_ok: false,
        };
        assert_eq!(tls_fail.first_failure(), Some(ProbeKind::Tls));

        let cluster_fail = CycleOutcome {
            dns_ok: true,
            tls_ok: true,
            cluster_ok: false,
        };
        assert_eq!(cluster_fail.first_failure(), Some(ProbeKind::Cluster));
    }

    #[test]
    fn test_probe_kind_names() {
        assert_eq!(ProbeKind::Dns.to_string(), "dns");
        assert_eq!(ProbeKind::Tls.to_string(), "tls");
        assert_eq!(ProbeKind::Cluster.to_string(), "cluster");
    }

    #[test]
    fn test_prober_constructs_from_config() {
        let config = Arc::new(test_config());
        let state = Arc::new(SharedState::new());
        let prober = ReachabilityProber::new(config, state, "https://search-ids2.example.net");
        assert!(prober.is_ok());
    }

    #[test]
    fn test_skipped_ticks_none_when_cycle_fits() {
        let interval = Duration::from_secs(30);
        let start = Instant::now();
        let mut next = start;
        // Cycle finished well before the next deadline.
        let skipped = skipped_ticks(&mut next, interval, start + Duration::from_secs(5));
        assert_eq!(skipped, 0);
        assert_eq!(next, start + interval);
    }

    #[test]
    fn test_skipped_ticks_counts_each_missed_deadline() {
        let interval = Duration::from_secs(30);
        let start = Instant::now();
        let mut next = start;
        // A 70s cycle with a 30s interval misses the +30s and +60s ticks.
        let skipped = skipped_ticks(&mut next, interval, start + Duration::from_secs(70));
        assert_eq!(skipped, 2);
        assert_eq!(next, start + interval * 3);
    }

    #[test]
    fn test_skipped_ticks_boundary_exactly_on_deadline() {
        let interval = Duration::from_secs(30);
        let start = Instant::now();
        let mut next = start;
        // Finishing exactly on the next deadline coalesces that tick.
        let skipped = skipped_ticks(&mut next, interval, start + interval);
        assert_eq!(skipped, 1);
        assert_eq!(next, start + interval * 2);
    }

    #[tokio::test]
    async fn test_with_cancel_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = with_cancel(&cancel, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), ProbeError>(())
        })
        .await;
        assert!(matches!(result, Err(ProbeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_run_cycle_against_unresolvable_domain_fails_dns() {
        let mut config = test_config();
        // Reserved TLD guaranteed not to resolve; single attempt keeps the
        // test fast.
        config.cluster.domain = "cluster.invalid".into();
        config.policy.retry_attempts = 1;
        let config = Arc::new(config);
        let state = Arc::new(SharedState::new());
        let prober =
            ReachabilityProber::new(Arc::clone(&config), Arc::clone(&state), "https://cluster.invalid")
                .expect("test: prober builds");

        let cancel = CancellationToken::new();
        let outcome = prober.run_cycle(&cancel).await;

        assert!(!outcome.dns_ok);
        assert_eq!(outcome.first_failure(), Some(ProbeKind::Dns));
        assert!(!state.dns_ok());
        assert!(!state.all_probes_ok());
    }

    #[tokio::test]
    async fn test_cadence_loop_exits_on_cancel() {
        let mut config = test_config();
        config.cluster.domain = "cluster.invalid".into();
        config.policy.retry_attempts = 1;
        let config = Arc::new(config);
        let state = Arc::new(SharedState::new());
        let prober = Arc::new(
            ReachabilityProber::new(config, Arc::clone(&state), "https://cluster.invalid")
                .expect("test: prober builds"),
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&prober).run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let joined = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(joined.is_ok(), "prober must stop promptly on cancel");
    }
}
