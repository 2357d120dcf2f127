//! Cluster client: bulk ping and metadata query.
//!
//! The agent never ships log records itself; this client exists for two
//! narrow jobs. During bring-up it answers "does the configured domain
//! expose a live cluster endpoint, and does the credential profile the
//! shipper will use actually exist". In steady state it sends the minimal
//! bulk ping the prober uses to verify end-to-end reachability.
//!
//! The ping writes a single `{"ping":true}` document to a sentinel index
//! (`<index_prefix>-connectivity`) so it is distinguishable from real
//! traffic and trivially prunable on the cluster side.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tracing::{debug, info};

use super::ProbeError;

/// Timeout for the bring-up metadata query.
const METADATA_TIMEOUT: Duration = Duration::from_secs(15);

/// Metadata reported by the cluster root document.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ClusterInfo {
    /// Cluster name, when the root document is readable.
    #[serde(default)]
    pub cluster_name: String,
}

/// HTTPS client for the remote search cluster.
pub struct ClusterClient {
    http: reqwest::Client,
    endpoint: String,
    sentinel_index: String,
}

impl ClusterClient {
    /// Build a client against a resolved endpoint URL.
    ///
    /// # Errors
    ///
    /// [`ProbeError::Setup`] if the endpoint is empty or the HTTP client
    /// cannot be constructed.
    pub fn new(endpoint: &str, index_prefix: &str, timeout: Duration) -> Result<Self, ProbeError> {
        let endpoint = endpoint.trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(ProbeError::Setup("cluster endpoint is empty".to_string()));
        }

        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Setup(format!("http client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            sentinel_index: format!("{index_prefix}-connectivity"),
        })
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sentinel index the bulk ping writes into.
    pub fn sentinel_index(&self) -> &str {
        &self.sentinel_index
    }

    /// Send one no-op document to the bulk-ingest path.
    ///
    /// Success is any 2xx response; the returned value is the request
    /// round-trip latency in milliseconds.
    ///
    /// # Errors
    ///
    /// [`ProbeError::Cluster`] on transport failure or a non-2xx status.
    pub async fn bulk_ping(&self) -> Result<f64, ProbeError> {
        let body = format!(
            "{{\"index\":{{\"_index\":\"{}\"}}}}\n{{\"ping\":true}}\n",
            self.sentinel_index
        );
        let url = format!("{}/_bulk", self.endpoint);

        let start = Instant::now();
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| ProbeError::Cluster {
                reason: e.to_string(),
            })?;
        let latency_ms = start.elapsed().as_secs_f64() * 1_000.0;

        if response.status().is_success() {
            debug!(
                latency_ms = format_args!("{latency_ms:.1}"),
                index = %self.sentinel_index,
                "bulk ping accepted"
            );
            Ok(latency_ms)
        } else {
            Err(ProbeError::Cluster {
                reason: format!("bulk ping returned HTTP {}", response.status()),
            })
        }
    }

    /// Query the cluster root document to confirm the endpoint is live.
    ///
    /// An authentication challenge (401/403) still proves a cluster answers
    /// at this endpoint; the agent holds no signing credentials of its own.
    ///
    /// # Errors
    ///
    /// [`ProbeError::Cluster`] on transport failure or a status outside
    /// 2xx/401/403.
    pub async fn fetch_metadata(&self) -> Result<ClusterInfo, ProbeError> {
        let attempt = async {
            let response =
                self.http
                    .get(&self.endpoint)
                    .send()
                    .await
                    .map_err(|e| ProbeError::Cluster {
                        reason: e.to_string(),
                    })?;

            let status = response.status();
            if status.is_success() {
                let info: ClusterInfo = response.json().await.unwrap_or(ClusterInfo {
                    cluster_name: String::new(),
                });
                if !info.cluster_name.is_empty() {
                    info!(cluster_name = %info.cluster_name, "cluster metadata retrieved");
                }
                Ok(info)
            } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                debug!(%status, "cluster answered with an auth challenge; endpoint is live");
                Ok(ClusterInfo {
                    cluster_name: String::new(),
                })
            } else {
                Err(ProbeError::Cluster {
                    reason: format!("metadata query returned HTTP {status}"),
                })
            }
        };

        tokio::time::timeout(METADATA_TIMEOUT, attempt)
            .await
            .map_err(|_| ProbeError::Cluster {
                reason: format!("metadata query timed out after {}s", METADATA_TIMEOUT.as_secs()),
            })?
    }
}

/// Resolve the credential profile by name: the profile must either be the
/// active `AWS_PROFILE` or appear as a section in the shared credentials or
/// config file. Secrets are never read into the process; only the section
/// header is matched.
pub fn credential_profile_present(profile: &str) -> bool {
    if std::env::var("AWS_PROFILE").map(|v| v == profile) == Ok(true) {
        return true;
    }

    for (path, header) in [
        (shared_credentials_path(), format!("[{profile}]")),
        (shared_config_path(), format!("[profile {profile}]")),
    ] {
        if let Some(path) = path {
            if let Ok(content) = std::fs::read_to_string(&path) {
                if content.lines().any(|line| line.trim() == header) {
                    return true;
                }
            }
        }
    }

    false
}

fn shared_credentials_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("AWS_SHARED_CREDENTIALS_FILE") {
        return Some(PathBuf::from(path));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".aws/credentials"))
}

fn shared_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("AWS_CONFIG_FILE") {
        return Some(PathBuf::from(path));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".aws/config"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_client_rejects_empty_endpoint() {
        let result = ClusterClient::new("", "ids2-logs", Duration::from_secs(30));
        assert!(matches!(result, Err(ProbeError::Setup(_))));
    }

    #[test]
    fn test_client_strips_trailing_slash() {
        let client = ClusterClient::new(
            "https://search.example.net/",
            "ids2-logs",
            Duration::from_secs(30),
        )
        .expect("test: client builds");
        assert_eq!(client.endpoint(), "https://search.example.net");
    }

    #[test]
    fn test_sentinel_index_uses_prefix() {
        let client = ClusterClient::new(
            "https://search.example.net",
            "ids2-logs",
            Duration::from_secs(30),
        )
        .expect("test: client builds");
        assert_eq!(client.sentinel_index(), "ids2-logs-connectivity");
    }

    #[tokio::test]
    async fn test_bulk_ping_unreachable_endpoint_fails() {
        // Reserved TLD: transport error, not a hang.
        let client = ClusterClient::new(
            "https://cluster.invalid",
            "ids2-logs",
            Duration::from_secs(2),
        )
        .expect("test: client builds");
        let result = client.bulk_ping().await;
        assert!(matches!(result, Err(ProbeError::Cluster { .. })));
    }

    #[tokio::test]
    async fn test_fetch_metadata_unreachable_endpoint_fails() {
        let client = ClusterClient::new(
            "https://cluster.invalid",
            "ids2-logs",
            Duration::from_secs(2),
        )
        .expect("test: client builds");
        let result = client.fetch_metadata().await;
        assert!(matches!(result, Err(ProbeError::Cluster { .. })));
    }

    #[test]
    fn test_credential_profile_resolution() {
        // One sequential test: the environment is process-global and the
        // test harness runs tests on parallel threads.
        let dir = tempfile::tempdir().expect("test: tempdir");
        let path = dir.path().join("credentials");
        let mut f = std::fs::File::create(&path).expect("test: create");
        writeln!(f, "[edge-shipper]\naws_access_key_id = AKIA...").expect("test: write");
        drop(f);

        std::env::set_var("AWS_SHARED_CREDENTIALS_FILE", &path);
        assert!(credential_profile_present("edge-shipper"));
        assert!(!credential_profile_present("absent-profile"));

        std::env::set_var("AWS_PROFILE", "env-profile");
        assert!(credential_profile_present("env-profile"));
        std::env::remove_var("AWS_PROFILE");
        std::env::remove_var("AWS_SHARED_CREDENTIALS_FILE");
    }
}
