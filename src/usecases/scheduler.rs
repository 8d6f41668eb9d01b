//! Scheduler - Daemon Loop for the Scheduled Jobs
//!
//! Ticks every `schedule.poll_interval_seconds`. While the session is
//! open each tick runs cleanup → sync → manage → trade; a failing job
//! is logged and counted without stopping the others. On shutdown the
//! loop optionally cancels working orders.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::metrics::{HealthState, MetricsRegistry};
use crate::config::AppConfig;
use crate::domain::market_hours::MarketCalendar;
use crate::ports::brokerage::Brokerage;
use crate::ports::lessons::LessonStore;
use crate::ports::repository::Repository;

use super::order_manager::OrderManager;
use super::position_manager::PositionManager;
use super::risk_manager::SharedRiskManager;
use super::state_sync::StateSync;
use super::trade_cycle::TradeCycle;

/// The jobs a tick runs, already wired.
pub struct Jobs<B: Brokerage, R: Repository, L: LessonStore> {
  pub orders: OrderManager<B>,
  pub sync: StateSync<B, R>,
  pub manage: PositionManager<B, R, L>,
  pub trade: TradeCycle<B, R, L>,
}

/// Daemon loop.
pub struct Scheduler<B: Brokerage, R: Repository, L: LessonStore> {
  jobs: Jobs<B, R, L>,
  broker: Arc<B>,
  repo: Arc<R>,
  risk: SharedRiskManager,
  calendar: MarketCalendar,
  poll_interval: Duration,
  stale_after: chrono::Duration,
  cancel_on_shutdown: bool,
  health: Arc<HealthState>,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl<B: Brokerage, R: Repository, L: LessonStore> Scheduler<B, R, L> {
  pub fn new(
    config: &AppConfig,
    jobs: Jobs<B, R, L>,
    broker: Arc<B>,
    repo: Arc<R>,
    risk: SharedRiskManager,
    health: Arc<HealthState>,
    metrics: Option<Arc<MetricsRegistry>>,
  ) -> Result<Self> {
    let calendar = MarketCalendar::from_strings(&config.schedule.holidays, &config.schedule.half_days)?;
    Ok(Self {
      jobs,
      broker,
      repo,
      risk,
      calendar,
      poll_interval: Duration::from_secs(config.schedule.poll_interval_seconds.max(1)),
      stale_after: stale_threshold(config.orders.stale_order_hours),
      cancel_on_shutdown: config.orders.cancel_on_shutdown,
      health,
      metrics,
    })
  }

  /// Run until the shutdown signal fires.
  #[instrument(skip_all, fields(poll_seconds = self.poll_interval.as_secs()))]
  pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let mut ticker = tokio::time::interval(self.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Scheduler started");

    loop {
      tokio::select! {
        _ = shutdown_rx.recv() => {
          info!("Shutdown signal received, stopping scheduler");
          break;
        }
        _ = ticker.tick() => {
          self.tick(Utc::now()).await;
        }
      }
    }

    if self.cancel_on_shutdown {
      match self.jobs.orders.cancel_all().await {
        Ok(report) => {
          if let Some(m) = &self.metrics {
            m.observe_cleanup(&report, "shutdown");
          }
          info!(
            cancelled = report.cancelled.len(),
            failed = report.failed.len(),
            "Working orders cancelled on shutdown"
          );
        }
        Err(e) => error!(error = %e, "Failed to cancel orders on shutdown"),
      }
    }

    info!("Scheduler stopped");
    Ok(())
  }

  /// One scheduler tick.
  pub async fn tick(&mut self, now: DateTime<Utc>) {
    self.refresh_health().await;

    if !self.calendar.is_open(now) {
      debug!(next_open = ?self.calendar.next_open(now), "Market closed");
      return;
    }
    let metrics = self.metrics.clone();
    let metrics = metrics.as_deref();

    let cleanup = self.jobs.orders.cleanup_stale_orders(now, self.stale_after);
    if let Some(report) = timed(metrics, "cleanup", cleanup).await {
      if let Some(m) = metrics {
        m.observe_cleanup(&report, "stale");
      }
    }
    if let Some(report) = timed(metrics, "sync", self.jobs.sync.run(now)).await {
      if let Some(m) = metrics {
        m.observe_sync(&report);
      }
    }
    if let Some(report) = timed(metrics, "manage", self.jobs.manage.run_once(now)).await {
      if let Some(m) = metrics {
        m.observe_manage(&report);
      }
    }
    if let Some(report) = timed(metrics, "trade", self.jobs.trade.run_once(now)).await {
      if let Some(m) = metrics {
        m.observe_cycle(&report);
      }
    }

    let breaker = self.risk.lock().await.is_circuit_breaker_active(now);
    self.health.set_trading_enabled(!breaker);
    if let Some(m) = metrics {
      m.circuit_breaker_active.set(if breaker { 1.0 } else { 0.0 });
    }
  }

  async fn refresh_health(&self) {
    let broker = self.broker.is_healthy().await;
    let storage = self.repo.is_healthy().await;
    if !broker {
      warn!("Brokerage health check failed");
    }
    if !storage {
      warn!("Storage health check failed");
    }
    self.health.set_broker(broker);
    self.health.set_storage(storage);
  }
}

/// Stale-order age from fractional hours.
pub fn stale_threshold(hours: f64) -> chrono::Duration {
  chrono::Duration::seconds((hours * 3600.0).round() as i64)
}

/// Run a job, recording its duration and logging a failure.
async fn timed<T>(
  metrics: Option<&MetricsRegistry>,
  job: &'static str,
  fut: impl Future<Output = Result<T>>,
) -> Option<T> {
  let started = Instant::now();
  let result = fut.await;
  let elapsed = started.elapsed().as_secs_f64();
  if let Some(m) = metrics {
    m.job_duration_seconds.with_label_values(&[job]).observe(elapsed);
  }
  match result {
    Ok(value) => {
      debug!(job, elapsed_s = elapsed, "Job finished");
      Some(value)
    }
    Err(e) => {
      error!(job, error = ?e, "Job failed");
      if let Some(m) = metrics {
        m.job_failures.with_label_values(&[job]).inc();
      }
      None
    }
  }
}
