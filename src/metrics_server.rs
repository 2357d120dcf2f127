//! Metrics HTTP server.
//!
//! Exposes the pipeline's aggregate health over HTTP:
//!
//! - `GET /metrics` — Prometheus text exposition, always a live snapshot of
//!   shared state at request time
//! - `GET /health` — `200 ok` when the pipeline is healthy, otherwise
//!   `503` with a one-line reason
//!
//! The server runs as a supervised worker: it binds its listener, serves
//! until the cancellation token fires, and touches its heartbeat on a short
//! cadence so a wedged accept loop is detected.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics::AgentMetrics;
use crate::state::{Phase, SharedState, WorkerName};

/// Shared handler context.
#[derive(Clone)]
struct AppState {
    state: Arc<SharedState>,
    metrics: Arc<AgentMetrics>,
}

/// Bind the metrics listener. Split out from [`serve`] so startup can treat
/// a bind failure as fatal before any worker is spawned.
///
/// # Errors
///
/// The underlying I/O error when the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Serve `/metrics` and `/health` on `listener` until cancellation.
///
/// Touches the metrics worker heartbeat every `heartbeat_interval` while
/// running. Returns when the token fires or the server errors out; the
/// supervisor decides what happens next.
pub async fn serve(
    listener: TcpListener,
    state: Arc<SharedState>,
    heartbeat_interval: Duration,
    cancel: CancellationToken,
) {
    let metrics = match AgentMetrics::new() {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!(error = %e, "metrics registry construction failed");
            return;
        }
    };

    let addr = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    info!(addr = %addr, "metrics server listening");

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState {
            state: Arc::clone(&state),
            metrics,
        });

    let server = {
        let cancel = cancel.clone();
        axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
    };

    let heartbeat = {
        let state = Arc::clone(&state);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                state.touch_heartbeat(WorkerName::Metrics);
                tokio::select! {
                    _ = tokio::time::sleep(heartbeat_interval) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        })
    };

    if let Err(e) = server.await {
        error!(error = %e, "metrics server terminated with error");
    } else {
        info!("metrics server stopped");
    }
    // The server is gone either way; stop advertising liveness.
    heartbeat.abort();
    let _ = heartbeat.await;
}

async fn metrics_handler(State(app): State<AppState>) -> Response {
    let payload = app.metrics.render(&app.state);
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        payload,
    )
        .into_response()
}

async fn health_handler(State(app): State<AppState>) -> Response {
    if app.state.pipeline_ok() {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, health_reason(&app.state)).into_response()
    }
}

/// One-line reason for a 503: the phase if the pipeline never reached
/// steady state, otherwise the failing probes.
fn health_reason(state: &SharedState) -> String {
    let phase = state.phase();
    if phase != Phase::Steady {
        return format!("not steady (phase={phase})");
    }

    let mut failing = Vec::new();
    if !state.dns_ok() {
        failing.push("dns");
    }
    if !state.tls_ok() {
        failing.push("tls");
    }
    if !state.cluster_ok() {
        failing.push("cluster");
    }
    if failing.is_empty() {
        "pipeline degraded".to_string()
    } else {
        format!("probes failing: {}", failing.join(", "))
    }
}
