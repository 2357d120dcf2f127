//! # Orchestrator — external command execution and config rendering
//!
//! ## Responsibility
//! Run the narrow set of external operations bring-up needs: render the
//! sniffer and shipper configuration files, and drive the compose tool
//! (`up`, `ps`, `down`). The state machine never shells out directly.
//!
//! ## Guarantees
//! - Bounded: every operation has its own timeout; timed-out processes are
//!   killed
//! - Serialized: at most one external command runs at a time
//! - Scrubbed: child processes get an explicit environment (PATH, HOME, and
//!   the credential-profile variable), never the full inherited set
//! - Observable: child stdout/stderr are line-forwarded to the log at
//!   INFO/ERROR
//!
//! ## NOT Responsible For
//! - Deciding whether a failure aborts bring-up (the state machine does)
//! - Container internals or image management

pub mod template;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::AgentConfig;
use crate::template::UnresolvedPlaceholder;

/// Timeout for template rendering.
pub const RENDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for `compose up -d`.
pub const UP_TIMEOUT: Duration = Duration::from_secs(180);

/// Timeout for one `compose ps` status query.
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for `compose down`.
pub const DOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Failures of external operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The external binary could not be started.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The operation exceeded its timeout and was killed.
    #[error("'{command}' timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    /// The command exited non-zero. Stderr is surfaced verbatim so the
    /// state machine can put it in the exit message.
    #[error("'{command}' exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Template file could not be read or output could not be written.
    #[error("template i/o on {path}: {source}")]
    TemplateIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Template referenced a value the renderer does not provide.
    #[error("template {path}: {source}")]
    TemplateRender {
        path: String,
        #[source]
        source: UnresolvedPlaceholder,
    },

    /// Rendered output failed basic syntactic validation.
    #[error("rendered config {path} is invalid: {reason}")]
    RenderedInvalid { path: String, reason: String },

    /// Compose status output could not be parsed.
    #[error("cannot parse compose status output: {0}")]
    StatusParse(String),
}

/// Status of one container in the stack.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerStatus {
    /// Container (service) name.
    #[serde(rename = "Name", alias = "Service")]
    pub name: String,
    /// Lifecycle state reported by the engine ("running", "exited", …).
    #[serde(rename = "State", default)]
    pub state: String,
    /// Healthcheck verdict, empty when the container defines none.
    #[serde(rename = "Health", default)]
    pub health: String,
}

impl ContainerStatus {
    /// A container counts as healthy when its healthcheck says so, or when
    /// it has no healthcheck and is running.
    pub fn is_healthy(&self) -> bool {
        if self.health.is_empty() {
            self.state.eq_ignore_ascii_case("running")
        } else {
            self.health.eq_ignore_ascii_case("healthy")
        }
    }
}

/// Summarize container statuses for log and exit messages.
pub fn format_statuses(statuses: &[ContainerStatus]) -> String {
    if statuses.is_empty() {
        return "no containers".to_string();
    }
    statuses
        .iter()
        .map(|s| {
            if s.health.is_empty() {
                format!("{}={}", s.name, s.state)
            } else {
                format!("{}={} ({})", s.name, s.state, s.health)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// The operations bring-up needs from the outside world. The compose-backed
/// implementation is [`ComposeOrchestrator`]; tests substitute their own.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Render `template_path` to `output_path` with the given bindings.
    async fn render(
        &self,
        template_path: &Path,
        output_path: &Path,
        values: &HashMap<String, String>,
    ) -> Result<(), OrchestratorError>;

    /// Start the container stack detached.
    async fn compose_up(&self) -> Result<(), OrchestratorError>;

    /// Query container statuses.
    async fn compose_status(&self) -> Result<Vec<ContainerStatus>, OrchestratorError>;

    /// Stop the container stack.
    async fn compose_down(&self) -> Result<(), OrchestratorError>;
}

/// Compose-backed orchestrator. Holds the command gate that serializes all
/// external invocations.
pub struct ComposeOrchestrator {
    compose_file: PathBuf,
    work_dir: PathBuf,
    credential_profile: String,
    command_gate: Mutex<()>,
}

impl ComposeOrchestrator {
    pub fn new(config: &AgentConfig) -> Self {
        let work_dir = config
            .paths
            .compose_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            compose_file: config.paths.compose_file.clone(),
            work_dir,
            credential_profile: config.cluster.credential_profile.clone(),
            command_gate: Mutex::new(()),
        }
    }

    /// Run `docker compose -f <file> <args…>` with a scrubbed environment,
    /// forwarding output lines to the log.
    async fn run_compose(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String, OrchestratorError> {
        let _gate = self.command_gate.lock().await;

        let command_label = format!("docker compose {}", args.join(" "));
        debug!(command = %command_label, "running external command");

        let mut child = Command::new("docker")
            .arg("compose")
            .arg("-f")
            .arg(&self.compose_file)
            .args(args)
            .current_dir(&self.work_dir)
            .env_clear()
            .envs(scrubbed_env(&self.credential_profile))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OrchestratorError::Spawn {
                command: command_label.clone(),
                source: e,
            })?;

        // Forward stderr lines as they arrive; collect them for the error
        // path as well.
        let stderr_task = child.stderr.take().map(|stderr| {
            let label = command_label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut collected = String::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    error!(command = %label, "{line}");
                    collected.push_str(&line);
                    collected.push('\n');
                }
                collected
            })
        });
        let stdout_task = child.stdout.take().map(|stdout| {
            let label = command_label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut collected = String::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(command = %label, "{line}");
                    collected.push_str(&line);
                    collected.push('\n');
                }
                collected
            })
        });

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(OrchestratorError::Spawn {
                    command: command_label,
                    source: e,
                })
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(OrchestratorError::Timeout {
                    command: command_label,
                    secs: timeout.as_secs(),
                });
            }
        };

        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            Ok(stdout)
        } else {
            Err(OrchestratorError::CommandFailed {
                command: command_label,
                code: status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl Orchestrator for ComposeOrchestrator {
    async fn render(
        &self,
        template_path: &Path,
        output_path: &Path,
        values: &HashMap<String, String>,
    ) -> Result<(), OrchestratorError> {
        let _gate = self.command_gate.lock().await;
        tokio::time::timeout(
            RENDER_TIMEOUT,
            template::render(template_path, output_path, values),
        )
        .await
        .map_err(|_| OrchestratorError::Timeout {
            command: format!("render {}", template_path.display()),
            secs: RENDER_TIMEOUT.as_secs(),
        })?
    }

    async fn compose_up(&self) -> Result<(), OrchestratorError> {
        self.run_compose(&["up", "-d"], UP_TIMEOUT).await?;
        Ok(())
    }

    async fn compose_status(&self) -> Result<Vec<ContainerStatus>, OrchestratorError> {
        let stdout = self
            .run_compose(&["ps", "--format", "json"], STATUS_TIMEOUT)
            .await?;
        parse_status_output(&stdout)
    }

    async fn compose_down(&self) -> Result<(), OrchestratorError> {
        self.run_compose(&["down"], DOWN_TIMEOUT).await?;
        Ok(())
    }
}

/// Minimal environment for child processes: locate binaries, resolve the
/// home directory, and name the credential profile. Nothing else leaks.
fn scrubbed_env(credential_profile: &str) -> HashMap<String, String> {
    let mut env = HashMap::new();
    if let Ok(path) = std::env::var("PATH") {
        env.insert("PATH".to_string(), path);
    }
    if let Ok(home) = std::env::var("HOME") {
        env.insert("HOME".to_string(), home);
    }
    env.insert("AWS_PROFILE".to_string(), credential_profile.to_string());
    env
}

/// Parse `compose ps --format json` output. Newer engines emit one JSON
/// object per line; older ones a single array.
fn parse_status_output(stdout: &str) -> Result<Vec<ContainerStatus>, OrchestratorError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| OrchestratorError::StatusParse(e.to_string()));
    }

    let mut statuses = Vec::new();
    for line in trimmed.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let status: ContainerStatus = serde_json::from_str(line)
            .map_err(|e| OrchestratorError::StatusParse(format!("{e} in line {line:?}")))?;
        statuses.push(status);
    }
    Ok(statuses)
}
