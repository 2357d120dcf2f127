//! Configuration validation.
//!
//! ## Responsibility
//! Check semantic constraints on a parsed [`AgentConfig`] that the type
//! system cannot express: range checks, cross-field ordering, address
//! syntax.
//!
//! ## Guarantees
//! - Validation collects *all* violations before returning
//! - Error messages include the field path and the offending value
//!
//! ## NOT Responsible For
//! - Parsing TOML or expanding placeholders (that belongs to `loader`)

use std::net::SocketAddr;

use super::AgentConfig;

/// Errors arising from configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("cannot read {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A `${NAME}` placeholder had no environment binding.
    #[error("environment variable '{var}' referenced by the configuration is not set")]
    MissingEnv {
        /// Name of the unset variable.
        var: String,
    },

    /// TOML parsing failed.
    #[error("parse error in {file}: {source}")]
    Parse {
        /// Path or label of the source that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("validation failed:\n{0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "resources.throttle_t1").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Validate all semantic constraints on an [`AgentConfig`].
///
/// Collects every violation before returning so the operator sees the full
/// scope of issues at once.
///
/// # Errors
///
/// Returns `Err(Vec<ConfigError>)` with every violation found.
pub fn validate(config: &AgentConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Throttle thresholds ──────────────────────────────────────────
    let r = &config.resources;
    for (field, value) in [
        ("resources.throttle_t1", r.throttle_t1),
        ("resources.throttle_t2", r.throttle_t2),
        ("resources.throttle_t3", r.throttle_t3),
    ] {
        if !(value > 0.0 && value <= 100.0) {
            errors.push(invalid(field, value, "must be in (0, 100]"));
        }
    }
    if !(r.throttle_t1 < r.throttle_t2 && r.throttle_t2 < r.throttle_t3) {
        errors.push(invalid(
            "resources.throttle_t1",
            format!("{}/{}/{}", r.throttle_t1, r.throttle_t2, r.throttle_t3),
            "thresholds must be strictly increasing (t1 < t2 < t3)",
        ));
    }

    // ── Ceilings ─────────────────────────────────────────────────────
    for (field, value) in [
        ("resources.max_cpu_percent", r.max_cpu_percent),
        ("resources.max_ram_percent", r.max_ram_percent),
    ] {
        if !(value > 0.0 && value <= 100.0) {
            errors.push(invalid(field, value, "must be in (0, 100]"));
        } else if value < r.throttle_t3 {
            errors.push(invalid(field, value, "must be >= throttle_t3"));
        }
    }

    // ── Intervals and timeouts ───────────────────────────────────────
    let w = &config.workers;
    for (field, value) in [
        ("workers.sample_interval_secs", w.sample_interval_secs),
        ("workers.check_interval_secs", w.check_interval_secs),
        ("workers.metrics_refresh_secs", w.metrics_refresh_secs),
        ("policy.shutdown_grace_secs", config.policy.shutdown_grace_secs),
        ("policy.phase_d_timeout_secs", config.policy.phase_d_timeout_secs),
        ("policy.retry_base_secs", config.policy.retry_base_secs),
        ("policy.retry_cap_secs", config.policy.retry_cap_secs),
        ("cluster.bulk_timeout_secs", config.cluster.bulk_timeout_secs),
    ] {
        if value == 0 {
            errors.push(invalid(field, value, "must be greater than zero"));
        }
    }
    if config.policy.retry_attempts == 0 {
        errors.push(invalid("policy.retry_attempts", 0, "must be at least 1"));
    }

    // ── Metrics bind address ─────────────────────────────────────────
    match config.workers.metrics_bind.parse::<SocketAddr>() {
        Ok(addr) => {
            if addr.port() == 0 {
                errors.push(invalid(
                    "workers.metrics_bind",
                    &config.workers.metrics_bind,
                    "port must be in [1, 65535]",
                ));
            }
        }
        Err(_) => {
            errors.push(invalid(
                "workers.metrics_bind",
                &config.workers.metrics_bind,
                "must be a valid address:port",
            ));
        }
    }

    // ── Required strings ─────────────────────────────────────────────
    for (field, value) in [
        ("host.interface", config.host.interface.as_str()),
        ("host.host_ip", config.host.host_ip.as_str()),
        ("cluster.credential_profile", config.cluster.credential_profile.as_str()),
        ("cluster.region", config.cluster.region.as_str()),
        ("cluster.domain", config.cluster.domain.as_str()),
    ] {
        if value.trim().is_empty() {
            errors.push(invalid(field, format!("{value:?}"), "must not be empty"));
        }
    }

    // ── Paths ────────────────────────────────────────────────────────
    let p = &config.paths;
    for (field, path) in [
        ("paths.compose_file", &p.compose_file),
        ("paths.shipper_template", &p.shipper_template),
        ("paths.shipper_config", &p.shipper_config),
        ("paths.sniffer_template", &p.sniffer_template),
        ("paths.sniffer_config", &p.sniffer_config),
        ("paths.ram_log_file", &p.ram_log_file),
        ("paths.buffer_dir", &p.buffer_dir),
    ] {
        if path.as_os_str().is_empty() {
            errors.push(invalid(field, "\"\"", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_fixtures::test_config;

    #[test]
    fn test_valid_config_passes() {
        let config = test_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_thresholds_must_increase() {
        let mut config = test_config();
        config.resources.throttle_t1 = 60.0;
        config.resources.throttle_t2 = 50.0;
        let errors = validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.to_string().contains("strictly increasing")));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = test_config();
        config.resources.throttle_t3 = 101.0;
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("throttle_t3")));
    }

    #[test]
    fn test_threshold_zero_rejected() {
        let mut config = test_config();
        config.resources.throttle_t1 = 0.0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_ceiling_below_t3_rejected() {
        let mut config = test_config();
        config.resources.max_cpu_percent = 65.0; // t3 defaults to 70
        let errors = validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.to_string().contains("max_cpu_percent")));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = test_config();
        config.workers.sample_interval_secs = 0;
        let errors = validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.to_string().contains("sample_interval_secs")));
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let mut config = test_config();
        config.policy.retry_attempts = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_metrics_bind_rejected() {
        let mut config = test_config();
        config.workers.metrics_bind = "not-an-address".into();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("metrics_bind")));
    }

    #[test]
    fn test_metrics_bind_port_zero_rejected() {
        let mut config = test_config();
        config.workers.metrics_bind = "0.0.0.0:0".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_interface_rejected() {
        let mut config = test_config();
        config.host.interface = "".into();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("host.interface")));
    }

    #[test]
    fn test_empty_path_rejected() {
        let mut config = test_config();
        config.paths.ram_log_file = "".into();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("ram_log_file")));
    }

    #[test]
    fn test_all_violations_collected() {
        let mut config = test_config();
        config.workers.sample_interval_secs = 0;
        config.host.interface = "".into();
        config.workers.metrics_bind = "junk".into();
        let errors = validate(&config).unwrap_err();
        assert!(errors.len() >= 3, "expected all violations, got {errors:?}");
    }

    #[test]
    fn test_empty_endpoint_is_allowed_at_load() {
        let mut config = test_config();
        config.cluster.endpoint = String::new();
        assert!(validate(&config).is_ok());
    }
}
