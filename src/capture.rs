//! Change capture for rendered configuration files.
//!
//! After bring-up renders the sniffer and shipper configs, their diff is
//! committed into the local working tree so the deployed configuration has
//! a history. Capture is best-effort: any precondition failure (not a work
//! tree, wrong branch, git missing) is logged and skipped unless strict
//! mode is configured.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::CaptureSection;

/// Timeout for any single git invocation.
const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Commit message used for rendered-config refreshes.
const COMMIT_MESSAGE: &str = "chore: refresh rendered pipeline configs";

/// Why a capture attempt did not commit.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// `repo_dir` is not inside a git work tree.
    #[error("{dir} is not a git work tree")]
    NotAWorkTree { dir: String },

    /// The work tree is on the wrong branch (or detached).
    #[error("work tree is on '{actual}', capture requires '{required}'")]
    WrongBranch { actual: String, required: String },

    /// A git command failed outright.
    #[error("git {args} failed: {detail}")]
    GitFailed { args: String, detail: String },
}

/// Outcome of one capture attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A commit was created.
    Committed,
    /// The tree was clean; nothing to record.
    NoChanges,
    /// Capture is disabled by configuration.
    Disabled,
}

/// Git-backed capture workflow for the rendered config files.
pub struct CaptureWorkflow {
    settings: CaptureSection,
}

impl CaptureWorkflow {
    pub fn new(settings: CaptureSection) -> Self {
        Self { settings }
    }

    /// Record rendered-config changes as a commit.
    ///
    /// `paths` are the rendered files, relative to or inside `repo_dir`.
    ///
    /// # Errors
    ///
    /// Precondition and git failures; the caller decides whether they abort
    /// (strict mode) or merely log.
    pub async fn capture(&self, paths: &[PathBuf]) -> Result<CaptureOutcome, CaptureError> {
        if !self.settings.enabled {
            debug!("change capture disabled by configuration");
            return Ok(CaptureOutcome::Disabled);
        }

        let dir = &self.settings.repo_dir;
        self.ensure_work_tree(dir).await?;
        self.ensure_branch(dir).await?;

        let path_args: Vec<String> = paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();

        let status = self
            .git(dir, &status_args(&path_args))
            .await?;
        if status.trim().is_empty() {
            info!("no rendered-config changes to capture");
            return Ok(CaptureOutcome::NoChanges);
        }

        let mut add_args = vec!["add".to_string(), "--".to_string()];
        add_args.extend(path_args.iter().cloned());
        self.git(dir, &add_args).await?;

        self.git(
            dir,
            &[
                "commit".to_string(),
                "-m".to_string(),
                COMMIT_MESSAGE.to_string(),
            ],
        )
        .await?;

        info!(message = COMMIT_MESSAGE, "rendered-config changes committed");
        Ok(CaptureOutcome::Committed)
    }

    /// Strictness comes from configuration; the state machine consults this
    /// to decide whether a capture error fails bring-up.
    pub fn strict(&self) -> bool {
        self.settings.strict
    }

    async fn ensure_work_tree(&self, dir: &Path) -> Result<(), CaptureError> {
        let inside = self
            .git(dir, &["rev-parse".to_string(), "--is-inside-work-tree".to_string()])
            .await
            .map_err(|_| CaptureError::NotAWorkTree {
                dir: dir.display().to_string(),
            })?;
        if inside.trim() == "true" {
            Ok(())
        } else {
            Err(CaptureError::NotAWorkTree {
                dir: dir.display().to_string(),
            })
        }
    }

    async fn ensure_branch(&self, dir: &Path) -> Result<(), CaptureError> {
        let branch = self
            .git(dir, &["branch".to_string(), "--show-current".to_string()])
            .await?;
        let branch = branch.trim();
        if branch == self.settings.required_branch {
            Ok(())
        } else {
            let actual = if branch.is_empty() {
                "<detached>".to_string()
            } else {
                branch.to_string()
            };
            Err(CaptureError::WrongBranch {
                actual,
                required: self.settings.required_branch.clone(),
            })
        }
    }

    async fn git(&self, dir: &Path, args: &[String]) -> Result<String, CaptureError> {
        let label = args.join(" ");
        debug!(args = %label, dir = %dir.display(), "running git");

        let output = async {
            Command::new("git")
                .args(args)
                .current_dir(dir)
                .stdin(Stdio::null())
                .output()
                .await
        };

        let output = tokio::time::timeout(GIT_TIMEOUT, output)
            .await
            .map_err(|_| CaptureError::GitFailed {
                args: label.clone(),
                detail: format!("timed out after {}s", GIT_TIMEOUT.as_secs()),
            })?
            .map_err(|e| CaptureError::GitFailed {
                args: label.clone(),
                detail: e.to_string(),
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(CaptureError::GitFailed {
                args: label,
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

fn status_args(path_args: &[String]) -> Vec<String> {
    let mut args = vec!["status".to_string(), "--porcelain".to_string(), "--".to_string()];
    args.extend(path_args.iter().cloned());
    args
}

/// Log-and-skip wrapper used by the bring-up state machine for non-strict
/// capture.
pub fn log_skip(error: &CaptureError) {
    warn!(error = %error, "change capture skipped");
}
