//! Health Server - Liveness and Readiness for the Daemon
//!
//! `/live` answers while the process runs. `/ready` returns a JSON
//! report: 200 when the brokerage and the data directory both passed
//! their last check, 503 otherwise. Whether new entries are allowed is
//! reported alongside but does not affect readiness.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, instrument};

/// Flags the scheduler refreshes every tick.
#[derive(Debug)]
pub struct HealthState {
    broker: AtomicBool,
    storage: AtomicBool,
    /// False while the circuit breaker holds or after shutdown began.
    trading_enabled: AtomicBool,
}

/// Body of `/ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub ready: bool,
    pub broker: bool,
    pub storage: bool,
    pub trading_enabled: bool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Everything healthy until the first check says otherwise.
    pub fn new() -> Self {
        Self {
            broker: AtomicBool::new(true),
            storage: AtomicBool::new(true),
            trading_enabled: AtomicBool::new(true),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.broker.load(Ordering::Relaxed) && self.storage.load(Ordering::Relaxed)
    }

    pub fn set_broker(&self, healthy: bool) {
        self.broker.store(healthy, Ordering::Relaxed);
    }

    pub fn set_storage(&self, healthy: bool) {
        self.storage.store(healthy, Ordering::Relaxed);
    }

    pub fn set_trading_enabled(&self, enabled: bool) {
        self.trading_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            ready: self.is_ready(),
            broker: self.broker.load(Ordering::Relaxed),
            storage: self.storage.load(Ordering::Relaxed),
            trading_enabled: self.trading_enabled.load(Ordering::Relaxed),
        }
    }
}

/// axum server for `/live` and `/ready`.
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until the shutdown signal fires.
    #[instrument(skip(self, shutdown_rx), fields(port = self.port))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/live", get(|| async { StatusCode::OK }))
            .route("/ready", get(readiness))
            .with_state(self.state);

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(address = %addr, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;
        Ok(())
    }
}

async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let report = state.report();
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
