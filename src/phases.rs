//! # Bring-up state machine — phases A through G
//!
//! ## Responsibility
//! Execute the ordered bring-up sequence exactly once per process: verify
//! credentials and cluster metadata, render external configs, start the
//! container stack, verify downstream reachability, verify the pipeline end
//! to end, capture rendered-config changes, and hand over to the
//! supervision loop.
//!
//! ## Guarantees
//! - Ordered: phases run A → F strictly in sequence, each at most once
//! - Observable: the current phase is written to shared state on entry
//! - Coded: every aborting phase maps to a dedicated process exit code
//! - Dry-run: the container stack and change capture are stubbed, and
//!   downstream reachability reports synthetic success
//!
//! ## NOT Responsible For
//! - Spawning or supervising workers (phase G belongs to the supervisor)
//! - Shelling out (external operations go through the orchestrator)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capture::{self, CaptureWorkflow};
use crate::config::AgentConfig;
use crate::orchestrator::template::{template_values, validate_shipper_config};
use crate::orchestrator::{format_statuses, Orchestrator};
use crate::prober::cluster::{credential_profile_present, ClusterClient};
use crate::prober::{CycleOutcome, ReachabilityProber, CLUSTER_TIMEOUT};
use crate::state::{Phase, SharedState};

/// How long phase C waits for every container to become healthy.
const STACK_HEALTH_TIMEOUT: Duration = Duration::from_secs(180);

/// Spacing between container health polls in phase C.
const STACK_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Spacing between reachability cycles in phase D.
const PHASE_D_CYCLE_GAP: Duration = Duration::from_secs(5);

/// A bring-up phase failure. Each aborting variant carries the message for
/// the exit line and maps onto the process exit code contract.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// Phase A: credentials or cluster metadata.
    #[error("phase A failed: {0}")]
    Credentials(String),

    /// Phase B: config rendering or validation.
    #[error("phase B failed: {0}")]
    Render(String),

    /// Phase C: container stack start or health.
    #[error("phase C failed: {0}")]
    Stack(String),

    /// Phase D: downstream reachability did not verify in time.
    #[error("phase D failed: {0}")]
    Reachability(String),

    /// Phase E: end-to-end pipeline verification.
    #[error("phase E failed: {0}")]
    Verification(String),

    /// Phase F in strict mode only.
    #[error("phase F failed: {0}")]
    Capture(String),

    /// A termination signal arrived mid-bring-up.
    #[error("bring-up interrupted by shutdown signal")]
    Cancelled,
}

impl PhaseError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            PhaseError::Credentials(_) => 3,
            PhaseError::Render(_) => 4,
            PhaseError::Stack(_) => 5,
            PhaseError::Reachability(_) => 6,
            PhaseError::Verification(_) => 7,
            PhaseError::Capture(_) => 1,
            PhaseError::Cancelled => 0,
        }
    }
}

/// What bring-up hands to the supervision stage.
pub struct BringUpOutcome {
    /// Cluster endpoint resolved during phase A.
    pub endpoint: String,
    /// Whether this run started the container stack (phase C actually ran
    /// `compose up`). Governs the stop-on-exit decision.
    pub stack_started: bool,
    /// Prober built against the resolved endpoint, reused by the steady
    /// state worker.
    pub prober: Arc<ReachabilityProber>,
}

impl std::fmt::Debug for BringUpOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BringUpOutcome")
            .field("endpoint", &self.endpoint)
            .field("stack_started", &self.stack_started)
            .finish_non_exhaustive()
    }
}

/// The bring-up state machine. Runs once; consumed by [`run`](Self::run).
pub struct BringUpMachine {
    config: Arc<AgentConfig>,
    state: Arc<SharedState>,
    orchestrator: Arc<dyn Orchestrator>,
    cancel: CancellationToken,
}

impl BringUpMachine {
    pub fn new(
        config: Arc<AgentConfig>,
        state: Arc<SharedState>,
        orchestrator: Arc<dyn Orchestrator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            orchestrator,
            cancel,
        }
    }

    /// Run phases A through F. Phase G (worker spawn) belongs to the
    /// supervisor, which takes over on success.
    ///
    /// # Errors
    ///
    /// The first failing phase, carrying its exit code.
    pub async fn run(self) -> Result<BringUpOutcome, PhaseError> {
        let endpoint = self.phase_a().await?;
        self.check_cancelled()?;

        let prober = Arc::new(
            ReachabilityProber::new(
                Arc::clone(&self.config),
                Arc::clone(&self.state),
                &endpoint,
            )
            .map_err(|e| PhaseError::Credentials(e.to_string()))?,
        );

        self.phase_b(&endpoint).await?;
        self.check_cancelled()?;
        let stack_started = self.phase_c().await?;
        self.check_cancelled()?;
        self.phase_d(&prober).await?;
        self.check_cancelled()?;
        self.phase_e().await?;
        self.phase_f().await?;

        Ok(BringUpOutcome {
            endpoint,
            stack_started,
            prober,
        })
    }

    fn check_cancelled(&self) -> Result<(), PhaseError> {
        if self.cancel.is_cancelled() {
            Err(PhaseError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Phase A: resolve the credential profile and the cluster endpoint.
    async fn phase_a(&self) -> Result<String, PhaseError> {
        self.state.set_phase(Phase::A);
        info!(phase = "a", "verifying credentials and cluster metadata");

        let profile = &self.config.cluster.credential_profile;
        if !credential_profile_present(profile) {
            return Err(PhaseError::Credentials(format!(
                "credential profile '{profile}' not found in environment or credentials store"
            )));
        }

        let candidate = endpoint_candidate(&self.config);
        let client = ClusterClient::new(&candidate, &self.config.cluster.index_prefix, CLUSTER_TIMEOUT)
            .map_err(|e| PhaseError::Credentials(e.to_string()))?;
        client
            .fetch_metadata()
            .await
            .map_err(|e| PhaseError::Credentials(format!("cluster metadata query: {e}")))?;

        info!(phase = "a", endpoint = %candidate, "cluster endpoint resolved");
        Ok(candidate)
    }

    /// Phase B: render both external configs and validate them.
    async fn phase_b(&self, endpoint: &str) -> Result<(), PhaseError> {
        self.state.set_phase(Phase::B);
        info!(phase = "b", "rendering sniffer and shipper configurations");

        let values = template_values(&self.config, endpoint);
        let paths = &self.config.paths;

        self.orchestrator
            .render(&paths.sniffer_template, &paths.sniffer_config, &values)
            .await
            .map_err(|e| PhaseError::Render(e.to_string()))?;
        self.orchestrator
            .render(&paths.shipper_template, &paths.shipper_config, &values)
            .await
            .map_err(|e| PhaseError::Render(e.to_string()))?;

        let shipper = tokio::fs::read_to_string(&paths.shipper_config)
            .await
            .map_err(|e| {
                PhaseError::Render(format!(
                    "cannot read rendered {}: {e}",
                    paths.shipper_config.display()
                ))
            })?;
        validate_shipper_config(&shipper).map_err(|reason| {
            PhaseError::Render(format!(
                "{} is not valid TOML: {reason}",
                paths.shipper_config.display()
            ))
        })?;

        // The RAM-log directory and the disk buffer belong to host bring-up
        // and the shipper container; the agent only warns when they are
        // missing.
        for dir in [
            paths.ram_log_file.parent().map(PathBuf::from),
            Some(paths.buffer_dir.clone()),
        ]
        .into_iter()
        .flatten()
        {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                warn!(dir = %dir.display(), "expected directory does not exist");
            }
        }

        info!(phase = "b", "configurations rendered and validated");
        Ok(())
    }

    /// Phase C: start the container stack and wait for health.
    /// Returns whether the stack was actually started.
    async fn phase_c(&self) -> Result<bool, PhaseError> {
        self.state.set_phase(Phase::C);

        if self.config.policy.dry_run {
            info!(phase = "c", "dry-run: would start container stack");
            return Ok(false);
        }

        info!(phase = "c", "starting container stack");
        self.orchestrator
            .compose_up()
            .await
            .map_err(|e| PhaseError::Stack(e.to_string()))?;

        let deadline = Instant::now() + STACK_HEALTH_TIMEOUT;
        let mut last_seen = Vec::new();
        loop {
            match self.orchestrator.compose_status().await {
                Ok(statuses) => {
                    if !statuses.is_empty() && statuses.iter().all(|s| s.is_healthy()) {
                        info!(
                            phase = "c",
                            containers = %format_statuses(&statuses),
                            "container stack healthy"
                        );
                        return Ok(true);
                    }
                    last_seen = statuses;
                }
                Err(e) => {
                    // A single failed poll is transient; the deadline caps it.
                    warn!(phase = "c", error = %e, "container status poll failed");
                }
            }

            if Instant::now() >= deadline {
                return Err(PhaseError::Stack(format!(
                    "containers not healthy after {}s: {}",
                    STACK_HEALTH_TIMEOUT.as_secs(),
                    format_statuses(&last_seen)
                )));
            }

            tokio::select! {
                _ = tokio::time::sleep(STACK_POLL_INTERVAL) => {}
                _ = self.cancel.cancelled() => return Err(PhaseError::Cancelled),
            }
        }
    }

    /// Phase D: one full reachability cycle with all probes succeeding,
    /// within the configured timeout.
    async fn phase_d(&self, prober: &ReachabilityProber) -> Result<(), PhaseError> {
        self.state.set_phase(Phase::D);

        if self.config.policy.dry_run {
            info!(phase = "d", "dry-run: reporting synthetic reachability success");
            self.state.set_dns_ok(true);
            self.state.set_tls_ok(true);
            self.state.set_cluster_ok(true);
            return Ok(());
        }

        info!(
            phase = "d",
            timeout_secs = self.config.policy.phase_d_timeout_secs,
            "verifying downstream reachability"
        );

        let deadline = Instant::now() + self.config.phase_d_timeout();
        let mut last_outcome: Option<CycleOutcome> = None;

        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, prober.run_cycle(&self.cancel)).await {
                Ok(outcome) => {
                    if self.cancel.is_cancelled() {
                        return Err(PhaseError::Cancelled);
                    }
                    if outcome.all_ok() {
                        info!(phase = "d", "downstream reachability verified");
                        return Ok(());
                    }
                    last_outcome = Some(outcome);
                }
                Err(_) => break, // deadline hit mid-cycle
            }

            tokio::select! {
                _ = tokio::time::sleep(PHASE_D_CYCLE_GAP) => {}
                _ = self.cancel.cancelled() => return Err(PhaseError::Cancelled),
            }
        }

        // Fall back to the state slots when the deadline cut a cycle short.
        let outcome = last_outcome.unwrap_or(CycleOutcome {
            dns_ok: self.state.dns_ok(),
            tls_ok: self.state.tls_ok(),
            cluster_ok: self.state.cluster_ok(),
        });
        let first_failing = outcome
            .first_failure()
            .map(|p| p.as_str())
            .unwrap_or("unknown");
        Err(PhaseError::Reachability(format!(
            "not reachable within {}s, first failing probe: {first_failing}",
            self.config.policy.phase_d_timeout_secs
        )))
    }

    /// Phase E: the pipeline is verified end to end.
    async fn phase_e(&self) -> Result<(), PhaseError> {
        self.state.set_phase(Phase::E);
        info!(phase = "e", "verifying pipeline");

        if !self.config.policy.dry_run {
            let statuses = self
                .orchestrator
                .compose_status()
                .await
                .map_err(|e| PhaseError::Verification(e.to_string()))?;
            if statuses.is_empty() || !statuses.iter().all(|s| s.is_healthy()) {
                return Err(PhaseError::Verification(format!(
                    "containers no longer healthy: {}",
                    format_statuses(&statuses)
                )));
            }
        }

        if !self.state.all_probes_ok() {
            return Err(PhaseError::Verification(
                "reachability checks failing".to_string(),
            ));
        }

        let throttle = self.state.throttle_level();
        if throttle > 2 {
            return Err(PhaseError::Verification(format!(
                "host under heavy resource pressure (throttle level {throttle})"
            )));
        }

        info!(phase = "e", "pipeline verified");
        Ok(())
    }

    /// Phase F: capture rendered-config changes. Best-effort unless strict.
    async fn phase_f(&self) -> Result<(), PhaseError> {
        self.state.set_phase(Phase::F);

        if self.config.policy.dry_run {
            info!(phase = "f", "dry-run: would capture rendered-config changes");
            return Ok(());
        }

        let workflow = CaptureWorkflow::new(self.config.capture.clone());
        let rendered = vec![
            self.config.paths.shipper_config.clone(),
            self.config.paths.sniffer_config.clone(),
        ];

        match workflow.capture(&rendered).await {
            Ok(outcome) => {
                info!(phase = "f", outcome = ?outcome, "change capture finished");
                Ok(())
            }
            Err(e) if workflow.strict() => Err(PhaseError::Capture(e.to_string())),
            Err(e) => {
                capture::log_skip(&e);
                Ok(())
            }
        }
    }
}

/// Endpoint used for the metadata query: the configured one when present,
/// otherwise HTTPS against the cluster domain.
pub fn endpoint_candidate(config: &AgentConfig) -> String {
    let configured = config.cluster.endpoint.trim();
    if configured.is_empty() {
        format!("https://{}", config.cluster.domain)
    } else {
        configured.to_string()
    }
}
