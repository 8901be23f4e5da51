use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness check response.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// Shared readiness state. Starts not ready.
#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Create a new health state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the arbiter as ready or not.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the arbiter is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Serve `/metrics`, `/health` and `/ready` on `addr`.
///
/// # Errors
///
/// Returns an error if installing the recorder or binding the HTTP server fails.
pub async fn start_metrics_server(
    addr: SocketAddr,
    health_state: HealthState,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(move || ready_handler(health_state.clone())));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

async fn ready_handler(state: HealthState) -> (StatusCode, Json<ReadyResponse>) {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not ready",
                ready: false,
            }),
        )
    }
}

/// Connection count gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("arbd_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("arbd_connections_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Record a registered connection with the given direction label.
    pub fn connections_total(direction: &'static str) {
        metrics::counter!("arbd_connections_total", "direction" => direction).increment(1);
    }

    /// Record a retired connection with the given reason label.
    pub fn connections_closed_total(reason: &'static str) {
        metrics::counter!("arbd_connections_closed_total", "reason" => reason).increment(1);
    }

    /// Record a received message with the given kind label.
    pub fn messages_received_total(kind: &'static str) {
        metrics::counter!("arbd_messages_received_total", "kind" => kind).increment(1);
    }

    /// Record an authorization decision.
    pub fn authorizations_total(command: &'static str, decision: &'static str) {
        metrics::counter!(
            "arbd_authorizations_total",
            "command" => command,
            "decision" => decision
        )
        .increment(1);
    }

    /// Increment the failed network log flush counter.
    pub fn log_flush_failures_total() {
        metrics::counter!("arbd_log_flush_failures_total").increment(1);
    }
}
