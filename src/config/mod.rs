//! # Agent configuration
//!
//! ## Responsibility
//! Define the TOML schema for the agent's configuration file. Loading,
//! environment-placeholder expansion, and validation live in the sibling
//! modules; this module is only the typed shape and its defaults.
//!
//! ## Guarantees
//! - Deterministic: the same TOML input always produces the same `AgentConfig`
//! - Immutable: the config is loaded once and never changes at runtime
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Placeholder expansion and file I/O (that belongs to `loader`)
//! - Range and cross-field checks (that belongs to `validation`)

pub mod loader;
pub mod validation;

use std::path::PathBuf;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ── Default value functions ──────────────────────────────────────────────

/// Default hard ceiling for CPU and RAM: 70%.
fn default_ceiling() -> f64 {
    70.0
}

fn default_t1() -> f64 {
    50.0
}

fn default_t2() -> f64 {
    60.0
}

fn default_t3() -> f64 {
    70.0
}

/// Default monitor sample interval: 2 s.
fn default_sample_interval_secs() -> u64 {
    2
}

/// Default prober cycle interval: 30 s.
fn default_check_interval_secs() -> u64 {
    30
}

fn default_metrics_bind() -> String {
    "0.0.0.0:9100".to_string()
}

/// Default metrics refresh interval: 5 s. Responses are always live
/// snapshots; this only paces the endpoint worker's heartbeat.
fn default_metrics_refresh_secs() -> u64 {
    5
}

fn default_index_prefix() -> String {
    "ids2-logs".to_string()
}

fn default_bulk_size() -> u32 {
    100
}

fn default_bulk_timeout_secs() -> u64 {
    30
}

/// Default shipper disk-buffer cap: 256 MiB.
fn default_buffer_max_size_bytes() -> u64 {
    268_435_456
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_phase_d_timeout_secs() -> u64 {
    120
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_secs() -> u64 {
    2
}

fn default_retry_cap_secs() -> u64 {
    10
}

fn default_required_branch() -> String {
    "dev".to_string()
}

fn default_repo_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for one agent instance.
///
/// Deserialized from a TOML file after `${NAME}` environment placeholders
/// have been expanded, then validated before use.
///
/// # Example
///
/// ```toml
/// [host]
/// interface = "eth0"
/// host_ip = "192.168.178.20"
///
/// [cluster]
/// credential_profile = "edge-shipper"
/// region = "us-east-1"
/// domain = "search-ids2.example.net"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AgentConfig {
    /// Managed host facets: network interface and address.
    pub host: HostSection,
    /// Resource ceilings and throttle thresholds.
    #[serde(default)]
    pub resources: ResourcesSection,
    /// Remote search cluster facets.
    pub cluster: ClusterSection,
    /// Worker cadences and the metrics bind address.
    #[serde(default)]
    pub workers: WorkersSection,
    /// Filesystem paths: compose file, templates, rendered configs, RAM log.
    pub paths: PathsSection,
    /// Operational policy: dry-run, shutdown grace, retries.
    #[serde(default)]
    pub policy: PolicySection,
    /// Change-capture settings for rendered configuration files.
    #[serde(default)]
    pub capture: CaptureSection,
}

/// Managed host facets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct HostSection {
    /// Name of the network interface the sniffer captures on.
    pub interface: String,
    /// IP literal of this host on the managed network.
    pub host_ip: String,
}

/// Resource ceilings and throttle thresholds, all percentages in (0, 100].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ResourcesSection {
    /// Hard CPU ceiling. Usage above this logs an error.
    #[serde(default = "default_ceiling")]
    pub max_cpu_percent: f64,
    /// Hard RAM ceiling. Usage above this logs an error.
    #[serde(default = "default_ceiling")]
    pub max_ram_percent: f64,
    /// Throttle level 1 threshold. Must be < `throttle_t2`.
    #[serde(default = "default_t1")]
    pub throttle_t1: f64,
    /// Throttle level 2 threshold. Must be < `throttle_t3`.
    #[serde(default = "default_t2")]
    pub throttle_t2: f64,
    /// Throttle level 3 threshold. Ceilings must be ≥ this.
    #[serde(default = "default_t3")]
    pub throttle_t3: f64,
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self {
            max_cpu_percent: default_ceiling(),
            max_ram_percent: default_ceiling(),
            throttle_t1: default_t1(),
            throttle_t2: default_t2(),
            throttle_t3: default_t3(),
        }
    }
}

/// Remote search cluster facets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ClusterSection {
    /// Credential profile name handed to the shipper container. The secret
    /// itself is never read by the agent.
    pub credential_profile: String,
    /// Cluster region identifier.
    pub region: String,
    /// DNS name of the cluster, probed for reachability.
    pub domain: String,
    /// Resolved HTTPS endpoint. May be empty at load; filled during
    /// bring-up from the cluster metadata query.
    #[serde(default)]
    pub endpoint: String,
    /// Prefix of the indices the shipper writes into.
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,
    /// Shipper batch size, substituted into the rendered shipper config.
    #[serde(default = "default_bulk_size")]
    pub bulk_size: u32,
    /// Shipper batch timeout in seconds.
    #[serde(default = "default_bulk_timeout_secs")]
    pub bulk_timeout_secs: u64,
}

/// Worker cadences and the metrics endpoint bind address.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct WorkersSection {
    /// Resource monitor sample interval in seconds.
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    /// Reachability prober cycle interval in seconds.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// `address:port` the metrics endpoint binds to.
    #[serde(default = "default_metrics_bind")]
    pub metrics_bind: String,
    /// Metrics worker heartbeat pacing in seconds.
    #[serde(default = "default_metrics_refresh_secs")]
    pub metrics_refresh_secs: u64,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval_secs(),
            check_interval_secs: default_check_interval_secs(),
            metrics_bind: default_metrics_bind(),
            metrics_refresh_secs: default_metrics_refresh_secs(),
        }
    }
}

/// Filesystem paths. The RAM-log directory and buffer directory must exist;
/// the agent never creates them.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PathsSection {
    /// Compose file describing the container stack.
    pub compose_file: PathBuf,
    /// Template the shipper config is rendered from.
    pub shipper_template: PathBuf,
    /// Rendered shipper configuration destination.
    pub shipper_config: PathBuf,
    /// Template the sniffer config is rendered from.
    pub sniffer_template: PathBuf,
    /// Rendered sniffer configuration destination.
    pub sniffer_config: PathBuf,
    /// RAM-backed NDJSON file the sniffer writes and the shipper tails.
    pub ram_log_file: PathBuf,
    /// Disk-buffer directory for the shipper container.
    pub buffer_dir: PathBuf,
    /// Disk-buffer size cap in bytes.
    #[serde(default = "default_buffer_max_size_bytes")]
    pub buffer_max_size_bytes: u64,
}

/// Operational policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PolicySection {
    /// Dry-run mode: the container stack is not touched and downstream
    /// reachability is reported as synthetic success.
    #[serde(default)]
    pub dry_run: bool,
    /// Seconds to wait for workers to drain after a termination signal.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Overall timeout for the downstream-reachability bring-up phase.
    #[serde(default = "default_phase_d_timeout_secs")]
    pub phase_d_timeout_secs: u64,
    /// Attempts per probe within one cycle.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay for probe retry backoff, in seconds.
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    /// Cap for probe retry backoff, in seconds.
    #[serde(default = "default_retry_cap_secs")]
    pub retry_cap_secs: u64,
    /// Stop the container stack on exit. Only honored when this run started
    /// the stack. Defaults to leaving the stack running.
    #[serde(default)]
    pub stop_stack_on_exit: bool,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            dry_run: false,
            shutdown_grace_secs: default_shutdown_grace_secs(),
            phase_d_timeout_secs: default_phase_d_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_base_secs: default_retry_base_secs(),
            retry_cap_secs: default_retry_cap_secs(),
            stop_stack_on_exit: false,
            log_format: LogFormat::default(),
        }
    }
}

/// Change-capture settings for rendered configuration files.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CaptureSection {
    /// Whether rendered-config changes are committed during bring-up.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Working tree the rendered configs live in.
    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,
    /// Branch the working tree must be on for capture to run.
    #[serde(default = "default_required_branch")]
    pub required_branch: String,
    /// When true, a wrong or undeterminable branch fails bring-up instead
    /// of skipping capture.
    #[serde(default)]
    pub strict: bool,
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            enabled: true,
            repo_dir: default_repo_dir(),
            required_branch: default_required_branch(),
            strict: false,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line, for machine consumption.
    Json,
}

impl AgentConfig {
    /// Monitor sample interval as a [`Duration`].
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.workers.sample_interval_secs)
    }

    /// Prober cycle interval as a [`Duration`].
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.workers.check_interval_secs)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.policy.shutdown_grace_secs)
    }

    /// Phase-D overall timeout as a [`Duration`].
    pub fn phase_d_timeout(&self) -> Duration {
        Duration::from_secs(self.policy.phase_d_timeout_secs)
    }
}

/// Export the JSON Schema for [`AgentConfig`], enabling IDE autocomplete
/// when editing the TOML file.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(AgentConfig);
    serde_json::to_string_pretty(&schema)
}


#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_TOML: &str = r#"
[host]
interface = "eth0"
host_ip = "192.168.178.20"

[cluster]
credential_profile = "edge-shipper"
region = "us-east-1"
domain = "search-ids2.example.net"

[paths]
compose_file = "docker/docker-compose.yml"
shipper_template = "templates/shipper.toml.tmpl"
shipper_config = "vector/vector.toml"
sniffer_template = "templates/sniffer.yaml.tmpl"
sniffer_config = "suricata/suricata.yaml"
ram_log_file = "/mnt/ram_logs/eve.json"
buffer_dir = "/var/lib/vector/buffer"
"#;

    #[test]
    fn test_minimal_toml_parses_with_defaults() {
        let config: AgentConfig = toml::from_str(MINIMAL_TOML).expect("test: minimal TOML parses");
        assert_eq!(config.resources.max_cpu_percent, 70.0);
        assert_eq!(config.resources.throttle_t1, 50.0);
        assert_eq!(config.resources.throttle_t2, 60.0);
        assert_eq!(config.resources.throttle_t3, 70.0);
        assert_eq!(config.workers.sample_interval_secs, 2);
        assert_eq!(config.workers.check_interval_secs, 30);
        assert_eq!(config.workers.metrics_bind, "0.0.0.0:9100");
        assert_eq!(config.cluster.bulk_size, 100);
        assert_eq!(config.cluster.bulk_timeout_secs, 30);
        assert_eq!(config.cluster.index_prefix, "ids2-logs");
        assert_eq!(config.paths.buffer_max_size_bytes, 268_435_456);
        assert_eq!(config.policy.shutdown_grace_secs, 30);
        assert_eq!(config.policy.phase_d_timeout_secs, 120);
        assert_eq!(config.policy.retry_attempts, 3);
        assert!(!config.policy.dry_run);
        assert!(!config.policy.stop_stack_on_exit);
        assert!(config.capture.enabled);
        assert_eq!(config.capture.required_branch, "dev");
        assert!(config.cluster.endpoint.is_empty());
    }

    #[test]
    fn test_durations_derived_from_seconds() {
        let config = test_fixtures::test_config();
        assert_eq!(config.sample_interval(), Duration::from_secs(2));
        assert_eq!(config.check_interval(), Duration::from_secs(30));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(30));
        assert_eq!(config.phase_d_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_log_format_deserializes_snake_case() {
        let fmt: LogFormat = serde_json::from_str("\"json\"").expect("test: deserialization");
        assert_eq!(fmt, LogFormat::Json);
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[test]
    fn test_toml_roundtrip_preserves_config() {
        let config = test_fixtures::test_config();
        let serialized = toml::to_string_pretty(&config).expect("test: serialize");
        let deserialized: AgentConfig = toml::from_str(&serialized).expect("test: deserialize");
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_export_schema_produces_valid_json() {
        let schema = export_schema().expect("test: schema export");
        let parsed: serde_json::Value =
            serde_json::from_str(&schema).expect("test: schema is valid JSON");
        assert!(parsed.get("properties").is_some() || parsed.get("$ref").is_some());
    }
}
