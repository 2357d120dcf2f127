//! Rendering of the sniffer and shipper configuration files.
//!
//! Rendering is mechanical: read the template, substitute `${NAME}` values
//! from the provided map, run a basic syntactic check, write the output.
//! The same template and the same values always produce byte-identical
//! output, so re-running bring-up is idempotent.

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use super::OrchestratorError;
use crate::config::AgentConfig;
use crate::template::substitute;

/// Build the substitution map for both templates from the loaded
/// configuration and the resolved cluster endpoint.
pub fn template_values(config: &AgentConfig, endpoint: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    values.insert("INTERFACE".to_string(), config.host.interface.clone());
    values.insert("HOST_IP".to_string(), config.host.host_ip.clone());
    values.insert(
        "RAM_LOG_FILE".to_string(),
        config.paths.ram_log_file.display().to_string(),
    );
    values.insert("CLUSTER_ENDPOINT".to_string(), endpoint.to_string());
    values.insert(
        "CREDENTIAL_PROFILE".to_string(),
        config.cluster.credential_profile.clone(),
    );
    values.insert("REGION".to_string(), config.cluster.region.clone());
    values.insert("INDEX_PREFIX".to_string(), config.cluster.index_prefix.clone());
    values.insert("BULK_SIZE".to_string(), config.cluster.bulk_size.to_string());
    values.insert(
        "BULK_TIMEOUT_SECS".to_string(),
        config.cluster.bulk_timeout_secs.to_string(),
    );
    values.insert(
        "BUFFER_DIR".to_string(),
        config.paths.buffer_dir.display().to_string(),
    );
    values.insert(
        "BUFFER_MAX_SIZE_BYTES".to_string(),
        config.paths.buffer_max_size_bytes.to_string(),
    );
    values
}

/// Render `template_path` into `output_path` with `values`.
///
/// # Errors
///
/// - [`OrchestratorError::TemplateIo`] on read or write failure.
/// - [`OrchestratorError::TemplateRender`] when the template references a
///   value the map does not carry.
/// - [`OrchestratorError::RenderedInvalid`] when the output is empty.
pub async fn render(
    template_path: &Path,
    output_path: &Path,
    values: &HashMap<String, String>,
) -> Result<(), OrchestratorError> {
    let template =
        tokio::fs::read_to_string(template_path)
            .await
            .map_err(|e| OrchestratorError::TemplateIo {
                path: template_path.display().to_string(),
                source: e,
            })?;

    let rendered =
        substitute(&template, |name| values.get(name).cloned()).map_err(|e| {
            OrchestratorError::TemplateRender {
                path: template_path.display().to_string(),
                source: e,
            }
        })?;

    if rendered.trim().is_empty() {
        return Err(OrchestratorError::RenderedInvalid {
            path: output_path.display().to_string(),
            reason: "rendered output is empty".to_string(),
        });
    }

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| OrchestratorError::TemplateIo {
                    path: parent.display().to_string(),
                    source: e,
                })?;
        }
    }

    tokio::fs::write(output_path, rendered.as_bytes())
        .await
        .map_err(|e| OrchestratorError::TemplateIo {
            path: output_path.display().to_string(),
            source: e,
        })?;

    info!(
        template = %template_path.display(),
        output = %output_path.display(),
        bytes = rendered.len(),
        "configuration rendered"
    );
    Ok(())
}

/// Basic syntactic validation of a rendered shipper config: it must parse
/// as TOML. The sniffer config is YAML, which the agent does not parse; it
/// is checked for emptiness at render time only.
pub fn validate_shipper_config(content: &str) -> Result<(), String> {
    toml::from_str::<toml::Value>(content)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_fixtures::test_config;

    #[test]
    fn test_template_values_cover_contract() {
        let config = test_config();
        let values = template_values(&config, "https://search.example.net");
        for key in [
            "INTERFACE",
            "HOST_IP",
            "RAM_LOG_FILE",
            "CLUSTER_ENDPOINT",
            "CREDENTIAL_PROFILE",
            "REGION",
            "INDEX_PREFIX",
            "BULK_SIZE",
            "BULK_TIMEOUT_SECS",
            "BUFFER_DIR",
            "BUFFER_MAX_SIZE_BYTES",
        ] {
            assert!(values.contains_key(key), "missing {key}");
        }
        assert_eq!(values["BULK_SIZE"], "100");
        assert_eq!(values["BULK_TIMEOUT_SECS"], "30");
        assert_eq!(values["BUFFER_MAX_SIZE_BYTES"], "268435456");
    }

    #[tokio::test]
    async fn test_render_substitutes_and_writes() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let template = dir.path().join("shipper.toml.tmpl");
        let output = dir.path().join("out/vector.toml");
        tokio::fs::write(
            &template,
            "[sinks.cluster]\nendpoint = \"${CLUSTER_ENDPOINT}\"\nbatch_size = ${BULK_SIZE}\n",
        )
        .await
        .expect("test: write template");

        let config = test_config();
        let values = template_values(&config, "https://search.example.net");
        render(&template, &output, &values)
            .await
            .expect("test: render");

        let rendered = tokio::fs::read_to_string(&output).await.expect("test: read");
        assert!(rendered.contains("endpoint = \"https://search.example.net\""));
        assert!(rendered.contains("batch_size = 100"));
        assert!(validate_shipper_config(&rendered).is_ok());
    }

    #[tokio::test]
    async fn test_render_twice_is_byte_identical() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let template = dir.path().join("t.tmpl");
        let out_a = dir.path().join("a.conf");
        let out_b = dir.path().join("b.conf");
        tokio::fs::write(&template, "iface ${INTERFACE}\nip ${HOST_IP}\n")
            .await
            .expect("test: write template");

        let config = test_config();
        let values = template_values(&config, "https://e");
        render(&template, &out_a, &values).await.expect("test: render a");
        render(&template, &out_b, &values).await.expect("test: render b");

        let a = tokio::fs::read(&out_a).await.expect("test: read a");
        let b = tokio::fs::read(&out_b).await.expect("test: read b");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_render_missing_value_names_placeholder() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let template = dir.path().join("t.tmpl");
        tokio::fs::write(&template, "x = ${NOT_A_VALUE}\n")
            .await
            .expect("test: write template");

        let config = test_config();
        let values = template_values(&config, "https://e");
        let result = render(&template, &dir.path().join("out.conf"), &values).await;
        match result {
            Err(OrchestratorError::TemplateRender { source, .. }) => {
                assert_eq!(source.name, "NOT_A_VALUE");
            }
            other => panic!("expected render error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_render_missing_template_is_io_error() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let result = render(
            &dir.path().join("absent.tmpl"),
            &dir.path().join("out.conf"),
            &HashMap::new(),
        )
        .await;
        assert!(matches!(result, Err(OrchestratorError::TemplateIo { .. })));
    }

    #[tokio::test]
    async fn test_render_empty_output_rejected() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let template = dir.path().join("empty.tmpl");
        tokio::fs::write(&template, "  \n").await.expect("test: write");
        let result = render(&template, &dir.path().join("out.conf"), &HashMap::new()).await;
        assert!(matches!(result, Err(OrchestratorError::RenderedInvalid { .. })));
    }

    #[test]
    fn test_validate_shipper_config_rejects_broken_toml() {
        assert!(validate_shipper_config("[sinks\nbroken").is_err());
        assert!(validate_shipper_config("[sinks.cluster]\nendpoint = \"x\"\n").is_ok());
    }
}
