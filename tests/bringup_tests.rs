//! Bring-up integration tests.
//!
//! These drive the real state machine and orchestrator render path against
//! a fake in-process cluster, in dry-run mode so the container stack is
//! never touched.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use ids2_agent::config::loader;
use ids2_agent::metrics_server;
use ids2_agent::orchestrator::ComposeOrchestrator;
use ids2_agent::state::WorkerName;
use ids2_agent::{AgentConfig, BringUpMachine, Phase, PhaseError, SharedState};

/// The process environment is global; env-mutating tests serialize on this.
fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Minimal cluster stand-in: answers the metadata query and the bulk ping.
async fn start_fake_cluster() -> (String, CancellationToken) {
    let app = Router::new()
        .route(
            "/",
            get(|| async {
                axum::Json(serde_json::json!({
                    "cluster_name": "ids2-itest",
                    "version": {"number": "2.11.0"}
                }))
            }),
        )
        .route(
            "/_bulk",
            post(|| async { axum::Json(serde_json::json!({"took": 1, "errors": false})) }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("test: bind fake cluster");
    let addr = listener.local_addr().expect("test: addr");
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
    });
    (format!("http://{addr}"), cancel)
}

/// Write a credentials file naming `profile` and point the resolver at it.
fn install_credentials(dir: &Path, profile: &str) {
    let path = dir.join("credentials");
    let mut f = std::fs::File::create(&path).expect("test: create credentials");
    writeln!(f, "[{profile}]\naws_access_key_id = AKIAITEST").expect("test: write credentials");
    std::env::set_var("AWS_SHARED_CREDENTIALS_FILE", &path);
}

/// Build a full dry-run configuration rooted in `dir`, loading through the
/// real loader so env placeholder expansion is exercised too.
fn build_config(dir: &Path, endpoint: &str) -> AgentConfig {
    std::env::set_var("IDS2_IT_ENDPOINT", endpoint);
    let toml = format!(
        r#"
[host]
interface = "eth0"
host_ip = "192.168.178.20"

[cluster]
credential_profile = "itest-shipper"
region = "us-east-1"
domain = "localhost"
endpoint = "${{IDS2_IT_ENDPOINT}}"

[workers]
metrics_bind = "127.0.0.1:9100"

[paths]
compose_file = "{dir}/docker-compose.yml"
shipper_template = "{dir}/shipper.toml.tmpl"
shipper_config = "{dir}/rendered/vector.toml"
sniffer_template = "{dir}/sniffer.yaml.tmpl"
sniffer_config = "{dir}/rendered/suricata.yaml"
ram_log_file = "{dir}/eve.json"
buffer_dir = "{dir}"

[policy]
dry_run = true
"#,
        dir = dir.display()
    );
    let config = loader::load_from_str(&toml, "itest.toml").expect("test: config loads");
    std::env::remove_var("IDS2_IT_ENDPOINT");
    config
}

fn write_templates(dir: &Path) {
    std::fs::write(
        dir.join("sniffer.yaml.tmpl"),
        "%YAML 1.1\n---\naf-packet:\n  - interface: ${INTERFACE}\noutputs:\n  - eve-log:\n      filename: ${RAM_LOG_FILE}\n",
    )
    .expect("test: write sniffer template");
    std::fs::write(
        dir.join("shipper.toml.tmpl"),
        "[sources.sniffer]\ninclude = [\"${RAM_LOG_FILE}\"]\n\n[sinks.cluster]\nendpoint = \"${CLUSTER_ENDPOINT}\"\nindex = \"${INDEX_PREFIX}-%Y.%m.%d\"\nbatch_size = ${BULK_SIZE}\nbatch_timeout_secs = ${BULK_TIMEOUT_SECS}\nbuffer_dir = \"${BUFFER_DIR}\"\nbuffer_max_size = ${BUFFER_MAX_SIZE_BYTES}\n",
    )
    .expect("test: write shipper template");
}

fn machine_for(config: AgentConfig, state: &Arc<SharedState>) -> BringUpMachine {
    let orchestrator = Arc::new(ComposeOrchestrator::new(&config));
    BringUpMachine::new(
        Arc::new(config),
        Arc::clone(state),
        orchestrator,
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn test_dry_run_bringup_happy_path() {
    let _guard = env_lock().lock().expect("test: env lock");
    let dir = tempfile::tempdir().expect("test: tempdir");
    install_credentials(dir.path(), "itest-shipper");
    write_templates(dir.path());

    let (endpoint, cluster_cancel) = start_fake_cluster().await;
    let config = build_config(dir.path(), &endpoint);
    let state = Arc::new(SharedState::new());

    let outcome = machine_for(config, &state)
        .run()
        .await
        .expect("test: bring-up succeeds");

    // Dry-run never starts the stack; the endpoint comes from config.
    assert!(!outcome.stack_started);
    assert_eq!(outcome.endpoint, endpoint);

    // Phase D synthesized success; phase F was stubbed.
    assert!(state.all_probes_ok());
    assert_eq!(state.phase(), Phase::F);

    // Rendered configs exist with substituted values.
    let shipper = std::fs::read_to_string(dir.path().join("rendered/vector.toml"))
        .expect("test: read shipper");
    assert!(shipper.contains(&endpoint));
    assert!(shipper.contains("batch_size = 100"));
    assert!(shipper.contains("buffer_max_size = 268435456"));
    let sniffer = std::fs::read_to_string(dir.path().join("rendered/suricata.yaml"))
        .expect("test: read sniffer");
    assert!(sniffer.contains("interface: eth0"));
    assert!(!sniffer.contains("${"));

    std::env::remove_var("AWS_SHARED_CREDENTIALS_FILE");
    cluster_cancel.cancel();
}

#[tokio::test]
async fn test_bringup_rendering_is_idempotent() {
    let _guard = env_lock().lock().expect("test: env lock");
    let dir = tempfile::tempdir().expect("test: tempdir");
    install_credentials(dir.path(), "itest-shipper");
    write_templates(dir.path());

    let (endpoint, cluster_cancel) = start_fake_cluster().await;
    let state = Arc::new(SharedState::new());

    machine_for(build_config(dir.path(), &endpoint), &state)
        .run()
        .await
        .expect("test: first bring-up");
    let first = std::fs::read(dir.path().join("rendered/vector.toml")).expect("test: read");

    machine_for(build_config(dir.path(), &endpoint), &state)
        .run()
        .await
        .expect("test: second bring-up");
    let second = std::fs::read(dir.path().join("rendered/vector.toml")).expect("test: read");

    assert_eq!(first, second, "re-rendering must be byte-identical");

    std::env::remove_var("AWS_SHARED_CREDENTIALS_FILE");
    cluster_cancel.cancel();
}

#[tokio::test]
async fn test_missing_credential_profile_aborts_phase_a() {
    let _guard = env_lock().lock().expect("test: env lock");
    let dir = tempfile::tempdir().expect("test: tempdir");
    // Credentials file exists but names a different profile.
    install_credentials(dir.path(), "someone-else");
    write_templates(dir.path());

    let (endpoint, cluster_cancel) = start_fake_cluster().await;
    let config = build_config(dir.path(), &endpoint);
    let state = Arc::new(SharedState::new());

    let err = machine_for(config, &state).run().await.unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(err.to_string().contains("itest-shipper"));
    assert_eq!(state.phase(), Phase::A);

    std::env::remove_var("AWS_SHARED_CREDENTIALS_FILE");
    cluster_cancel.cancel();
}

#[tokio::test]
async fn test_unreachable_cluster_aborts_phase_a() {
    let _guard = env_lock().lock().expect("test: env lock");
    let dir = tempfile::tempdir().expect("test: tempdir");
    install_credentials(dir.path(), "itest-shipper");
    write_templates(dir.path());

    // Bind-then-drop: nothing listens on this endpoint.
    let endpoint = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("test: bind");
        format!("http://{}", listener.local_addr().expect("test: addr"))
    };
    let config = build_config(dir.path(), &endpoint);
    let state = Arc::new(SharedState::new());

    let err = machine_for(config, &state).run().await.unwrap_err();
    assert!(matches!(err, PhaseError::Credentials(_)));
    assert_eq!(err.exit_code(), 3);

    std::env::remove_var("AWS_SHARED_CREDENTIALS_FILE");
}

#[tokio::test]
async fn test_broken_template_aborts_phase_b() {
    let _guard = env_lock().lock().expect("test: env lock");
    let dir = tempfile::tempdir().expect("test: tempdir");
    install_credentials(dir.path(), "itest-shipper");
    write_templates(dir.path());
    // Sniffer template references a value the renderer does not provide.
    std::fs::write(
        dir.path().join("sniffer.yaml.tmpl"),
        "af-packet:\n  - interface: ${NO_SUCH_VALUE}\n",
    )
    .expect("test: write broken template");

    let (endpoint, cluster_cancel) = start_fake_cluster().await;
    let config = build_config(dir.path(), &endpoint);
    let state = Arc::new(SharedState::new());

    let err = machine_for(config, &state).run().await.unwrap_err();
    assert_eq!(err.exit_code(), 4);
    assert!(err.to_string().contains("NO_SUCH_VALUE"));
    assert_eq!(state.phase(), Phase::B);

    std::env::remove_var("AWS_SHARED_CREDENTIALS_FILE");
    cluster_cancel.cancel();
}

#[tokio::test]
async fn test_metrics_surface_after_dry_run_bringup() {
    let _guard = env_lock().lock().expect("test: env lock");
    let dir = tempfile::tempdir().expect("test: tempdir");
    install_credentials(dir.path(), "itest-shipper");
    write_templates(dir.path());

    let (endpoint, cluster_cancel) = start_fake_cluster().await;
    let config = build_config(dir.path(), &endpoint);
    let state = Arc::new(SharedState::new());

    machine_for(config, &state)
        .run()
        .await
        .expect("test: bring-up succeeds");
    std::env::remove_var("AWS_SHARED_CREDENTIALS_FILE");

    // Simulate the supervisor reaching steady state.
    state.set_phase(Phase::Steady);
    state.set_pipeline_ok(state.all_probes_ok());
    state.set_worker_alive(WorkerName::Prober, true);

    let listener = metrics_server::bind("127.0.0.1:0".parse().expect("test: addr"))
        .await
        .expect("test: bind metrics");
    let addr = listener.local_addr().expect("test: addr");
    let cancel = CancellationToken::new();
    tokio::spawn(metrics_server::serve(
        listener,
        Arc::clone(&state),
        Duration::from_secs(5),
        cancel.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let metrics = reqwest::get(format!("http://{addr}/metrics"))
        .await
        .expect("test: scrape")
        .text()
        .await
        .expect("test: body");
    assert!(metrics.contains("ids2_pipeline_ok 1"));
    assert!(metrics.contains("ids2_dns_status 1"));
    assert!(metrics.contains("ids2_worker_alive{name=\"prober\"} 1"));

    let health = reqwest::get(format!("http://{addr}/health"))
        .await
        .expect("test: health");
    assert_eq!(health.status().as_u16(), 200);
    assert_eq!(health.text().await.expect("test: body"), "ok");

    cancel.cancel();
    cluster_cancel.cancel();
}
