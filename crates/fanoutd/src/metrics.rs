use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

/// Readiness flag shared between the lifecycle controller and `/ready`.
///
/// Starts out not ready; the controller flips it once the listeners are up
/// and back again when shutdown begins.
#[derive(Clone, Debug, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// A state that reports not ready.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update readiness.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Current readiness.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Serve `/metrics`, `/health` and `/ready` on `addr` until the task is
/// dropped.
///
/// # Errors
///
/// Returns an error if a Prometheus recorder is already installed or the
/// address cannot be bound.
pub async fn start_metrics_server(addr: SocketAddr, health: HealthState) -> anyhow::Result<()> {
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
        .route("/ready", get(move || ready_handler(health.clone())));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("METRICS: listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

/// 200 while the listeners are accepting, 503 during startup and shutdown.
async fn ready_handler(state: HealthState) -> (StatusCode, Json<ReadyResponse>) {
    let ready = state.is_ready();
    let (code, status) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    };
    (code, Json(ReadyResponse { status, ready }))
}

/// Subscriber gauges.
pub mod gauges {
    /// Publish the current registry size.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_subscribers_active(count: usize) {
        metrics::gauge!("fanout_subscribers_active").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Count one envelope entering the dispatcher from `transport`.
    pub fn envelopes_total(transport: &'static str) {
        metrics::counter!("fanout_envelopes_total", "transport" => transport).increment(1);
    }

    /// Count ACKs written back to producers on `transport`.
    pub fn acks_total(transport: &'static str) {
        metrics::counter!("fanout_acks_total", "transport" => transport).increment(1);
    }

    /// Add frames successfully queued to subscribers.
    pub fn broadcast_deliveries_total(count: u64) {
        metrics::counter!("fanout_broadcast_deliveries_total").increment(count);
    }

    /// Add subscribers dropped after a failed send.
    pub fn broadcast_failures_total(count: u64) {
        metrics::counter!("fanout_broadcast_failures_total").increment(count);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Time spent fanning one envelope out, in seconds.
    pub fn broadcast_seconds(value: f64) {
        metrics::histogram!("fanout_broadcast_seconds").record(value);
    }
}
