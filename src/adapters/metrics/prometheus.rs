//! Prometheus Metrics Registry - Trading Observability
//!
//! Registers and exposes Prometheus metrics on :9090 for Grafana
//! dashboards. Covers gate rejections, order flow, exits, account
//! balances, the circuit breaker and trade-cycle latency.

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::ports::brokerage::AccountSnapshot;
use crate::usecases::order_manager::CleanupReport;
use crate::usecases::position_manager::ManageReport;
use crate::usecases::state_sync::SyncReport;
use crate::usecases::trade_cycle::{CycleReport, SymbolOutcome};

/// Centralized Prometheus metrics for the trading bot.
///
/// All metrics follow the naming convention `options_bot_*`.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Candidates rejected, by gate.
    pub gate_rejections: IntCounterVec,
    /// Orders submitted, by strategy and action.
    pub orders_placed: IntCounterVec,
    /// Orders cancelled, by reason.
    pub orders_cancelled: IntCounterVec,
    /// Positions closed, by exit reason.
    pub positions_closed: IntCounterVec,
    /// Account balances (equity, buying power, options buying power).
    pub account_value: GaugeVec,
    /// Open option positions.
    pub open_positions: IntGauge,
    /// Circuit breaker status gauge (1 = active).
    pub circuit_breaker_active: Gauge,
    /// Job duration histogram (seconds), by job.
    pub job_duration_seconds: HistogramVec,
    /// Job failures, by job.
    pub job_failures: IntCounterVec,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let gate_rejections = IntCounterVec::new(
            Opts::new(
                "options_bot_gate_rejections_total",
                "Trade candidates rejected by a gate",
            ),
            &["gate"],
        )?;

        let orders_placed = IntCounterVec::new(
            Opts::new("options_bot_orders_placed_total", "Total orders submitted"),
            &["strategy", "action"],
        )?;

        let orders_cancelled = IntCounterVec::new(
            Opts::new(
                "options_bot_orders_cancelled_total",
                "Total orders cancelled",
            ),
            &["reason"],
        )?;

        let positions_closed = IntCounterVec::new(
            Opts::new(
                "options_bot_positions_closed_total",
                "Option positions closed by exit reason",
            ),
            &["reason"],
        )?;

        let account_value = GaugeVec::new(
            Opts::new("options_bot_account_value_usd", "Account balances in USD"),
            &["kind"],
        )?;

        let open_positions = IntGauge::new(
            "options_bot_open_option_positions",
            "Open option positions (legs)",
        )?;

        let circuit_breaker_active = Gauge::new(
            "options_bot_circuit_breaker_active",
            "Whether circuit breaker is active (1=yes, 0=no)",
        )?;

        let job_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "options_bot_job_duration_seconds",
                "Scheduled job duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["job"],
        )?;

        let job_failures = IntCounterVec::new(
            Opts::new("options_bot_job_failures_total", "Scheduled job failures"),
            &["job"],
        )?;

        // Register all metrics
        registry.register(Box::new(gate_rejections.clone()))?;
        registry.register(Box::new(orders_placed.clone()))?;
        registry.register(Box::new(orders_cancelled.clone()))?;
        registry.register(Box::new(positions_closed.clone()))?;
        registry.register(Box::new(account_value.clone()))?;
        registry.register(Box::new(open_positions.clone()))?;
        registry.register(Box::new(circuit_breaker_active.clone()))?;
        registry.register(Box::new(job_duration_seconds.clone()))?;
        registry.register(Box::new(job_failures.clone()))?;

        Ok(Self {
            registry,
            gate_rejections,
            orders_placed,
            orders_cancelled,
            positions_closed,
            account_value,
            open_positions,
            circuit_breaker_active,
            job_duration_seconds,
            job_failures,
        })
    }

    /// Record account balances.
    pub fn observe_account(&self, account: &AccountSnapshot) {
        self.account_value.with_label_values(&["equity"]).set(account.equity);
        self.account_value
            .with_label_values(&["buying_power"])
            .set(account.buying_power);
        self.account_value
            .with_label_values(&["options_buying_power"])
            .set(account.options_buying_power);
    }

    /// Record a sync: balances and open option positions.
    pub fn observe_sync(&self, report: &SyncReport) {
        self.observe_account(&report.account);
        self.open_positions
            .set(i64::try_from(report.option_positions).unwrap_or(i64::MAX));
    }

    /// Count gate rejections and submitted entries.
    pub fn observe_cycle(&self, report: &CycleReport) {
        for result in &report.results {
            match &result.outcome {
                SymbolOutcome::Rejected { gate, .. } => {
                    self.gate_rejections
                        .with_label_values(&[gate.as_str()])
                        .inc();
                }
                SymbolOutcome::Submitted { .. } => {
                    let strategy = result.strategy.to_string();
                    self.orders_placed
                        .with_label_values(&[strategy.as_str(), "open"])
                        .inc();
                }
                _ => {}
            }
        }
    }

    /// Count closing orders sent and exits booked by reason.
    pub fn observe_manage(&self, report: &ManageReport) {
        self.orders_placed
            .with_label_values(&["exit", "close"])
            .inc_by(report.closed.len() as u64);
        for settled in &report.settled {
            let reason = settled.reason.to_string();
            self.positions_closed
                .with_label_values(&[reason.as_str()])
                .inc();
        }
    }

    /// Count cancellations from a stale sweep or shutdown.
    pub fn observe_cleanup(&self, report: &CleanupReport, reason: &str) {
        self.orders_cancelled
            .with_label_values(&[reason])
            .inc_by(report.cancelled.len() as u64);
    }

    /// Render the registry in the text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}
