//! Configuration file loading.
//!
//! ## Responsibility
//! Read the TOML file from disk, expand `${NAME}` environment placeholders,
//! parse into an [`AgentConfig`], and run validation before returning. This
//! is the only entry point for loading configuration at startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - An unresolved placeholder is fatal and names the missing variable
//! - I/O, placeholder, parse, and validation errors are distinguished
//!
//! ## NOT Responsible For
//! - Defining the schema (that belongs to `mod.rs`)
//! - Hot-reload (configuration changes require a restart)

use std::path::Path;

use super::validation::{self, ConfigError};
use super::AgentConfig;
use crate::template;

/// Load an [`AgentConfig`] from a TOML file.
///
/// Placeholders of the form `${NAME}` anywhere in the file are expanded from
/// the process environment before parsing; `$${NAME}` yields the literal
/// `${NAME}`.
///
/// # Errors
///
/// - [`ConfigError::Io`] if the file cannot be read.
/// - [`ConfigError::MissingEnv`] for the first unresolved placeholder.
/// - [`ConfigError::Parse`] if the expanded TOML is malformed.
/// - [`ConfigError::Validation`] / [`ConfigError::InvalidField`] if semantic
///   constraints are violated.
pub fn load_from_file(path: &Path) -> Result<AgentConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load an [`AgentConfig`] from a TOML string. Useful for tests.
///
/// # Errors
///
/// Same as [`load_from_file`], minus the I/O variant.
pub fn load_from_str(content: &str, source_name: &str) -> Result<AgentConfig, ConfigError> {
    let expanded =
        template::substitute_env(content).map_err(|e| ConfigError::MissingEnv { var: e.name })?;

    let config: AgentConfig = toml::from_str(&expanded).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_TOML: &str = r#"
[host]
interface = "eth0"
host_ip = "192.168.178.20"

[cluster]
credential_profile = "edge-shipper"
region = "us-east-1"
domain = "search-ids2.example.net"
endpoint = "https://search-ids2.example.net"

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
    fn test_load_from_str_valid_toml_succeeds() {
        let config = load_from_str(VALID_TOML, "test").expect("test: valid config");
        assert_eq!(config.host.interface, "eth0");
        assert_eq!(config.cluster.domain, "search-ids2.example.net");
    }

    #[test]
    fn test_load_from_str_invalid_toml_returns_parse_error() {
        let result = load_from_str("not valid toml [[[", "bad.toml");
        assert!(matches!(result.unwrap_err(), ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_from_str_missing_env_names_variable() {
        // Deliberately unlikely variable name.
        let toml_str = VALID_TOML.replace(
            "endpoint = \"https://search-ids2.example.net\"",
            "endpoint = \"${IDS2_TEST_UNSET_ENDPOINT_VAR}\"",
        );
        let result = load_from_str(&toml_str, "env.toml");
        match result.unwrap_err() {
            ConfigError::MissingEnv { var } => {
                assert_eq!(var, "IDS2_TEST_UNSET_ENDPOINT_VAR");
            }
            other => panic!("expected MissingEnv, got {other}"),
        }
    }

    #[test]
    fn test_load_from_str_env_placeholder_resolves() {
        std::env::set_var("IDS2_TEST_REGION", "eu-west-1");
        let toml_str = VALID_TOML.replace("region = \"us-east-1\"", "region = \"${IDS2_TEST_REGION}\"");
        let config = load_from_str(&toml_str, "env.toml").expect("test: env resolves");
        assert_eq!(config.cluster.region, "eu-west-1");
        std::env::remove_var("IDS2_TEST_REGION");
    }

    #[test]
    fn test_load_from_str_escaped_placeholder_is_literal() {
        let with_escape =
            format!("{VALID_TOML}\n[capture]\nrequired_branch = \"$${{BRANCH}}\"\n");
        let config = load_from_str(&with_escape, "escape.toml").expect("test: escape parses");
        assert_eq!(config.capture.required_branch, "${BRANCH}");
    }

    #[test]
    fn test_load_from_str_validation_failure_reported() {
        let toml_str = VALID_TOML.to_string()
            + r#"
[resources]
throttle_t1 = 60.0
throttle_t2 = 50.0
"#;
        let result = load_from_str(&toml_str, "invalid.toml");
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_load_from_file_missing_file_returns_io_error() {
        let result = load_from_file(Path::new("/nonexistent/ids2/config.toml"));
        assert!(matches!(result.unwrap_err(), ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_from_file_valid_toml_succeeds() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, VALID_TOML).expect("test: write");
        let config = load_from_file(&path).expect("test: load from file");
        assert_eq!(config.host.host_ip, "192.168.178.20");
    }

    #[test]
    fn test_load_from_str_source_name_appears_in_parse_error() {
        let result = load_from_str("broken [[[", "my-config.toml");
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("my-config.toml"));
    }
}
