//! Order Manager - Order Lifecycle Management
//!
//! Manages the lifecycle of option orders:
//! - Submitting limit orders through the brokerage port
//! - Dry-run placements that never reach the broker
//! - Cancelling stale orders past a configurable age
//! - Rate limiting (orders per minute + minimum interval)
//! - Graceful shutdown (cancel all)

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::OrderConfig;
use crate::domain::trade::{OptionOrder, OrderId, OrderStatus};
use crate::ports::brokerage::{Brokerage, OrderPlacement};

/// Outcome of a stale-order sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
  /// Open orders looked at.
  pub inspected: usize,
  /// Orders cancelled.
  pub cancelled: Vec<OrderId>,
  /// Orders whose cancel failed, with the reason.
  pub failed: Vec<(OrderId, String)>,
}

/// Manages order placement with rate limiting.
pub struct OrderManager<B: Brokerage> {
  /// Brokerage port.
  broker: Arc<B>,
  /// Log and synthesise placements instead of submitting.
  dry_run: bool,
  /// Rate limiter: timestamps of recent orders.
  order_timestamps: Vec<Instant>,
  /// Maximum orders per minute.
  max_orders_per_minute: u32,
  /// Minimum interval between orders (ms).
  min_interval_ms: u64,
  /// Last order time.
  last_order_time: Option<Instant>,
}

impl<B: Brokerage> OrderManager<B> {
  /// Create a new order manager.
  pub fn new(broker: Arc<B>, config: &OrderConfig, dry_run: bool) -> Self {
    Self {
      broker,
      dry_run,
      order_timestamps: Vec::new(),
      max_orders_per_minute: config.max_orders_per_minute,
      min_interval_ms: config.min_interval_ms,
      last_order_time: None,
    }
  }

  /// Whether placements are synthesised.
  pub fn is_dry_run(&self) -> bool {
    self.dry_run
  }

  /// Submit an order.
  ///
  /// Returns `None` when the per-minute budget is spent. The minimum
  /// interval is waited out rather than skipped.
  #[instrument(skip(self, order), fields(client_order_id = %order.client_order_id, legs = order.legs.len(), limit = order.limit_price))]
  pub async fn submit(&mut self, order: &OptionOrder) -> Result<Option<OrderPlacement>> {
    if !self.check_rate_limit() {
      warn!(max = self.max_orders_per_minute, "Order rate limit reached, skipping order");
      return Ok(None);
    }

    if let Some(last) = self.last_order_time {
      let min_interval = Duration::from_millis(self.min_interval_ms);
      let elapsed = last.elapsed();
      if elapsed < min_interval {
        debug!(
          elapsed_ms = elapsed.as_millis(),
          min_ms = self.min_interval_ms,
          "Waiting out minimum order interval"
        );
        tokio::time::sleep(min_interval - elapsed).await;
      }
    }

    if self.dry_run {
      let placement = OrderPlacement {
        order_id: format!("dry-run-{}", Uuid::new_v4()),
        client_order_id: order.client_order_id.clone(),
        status: OrderStatus::Accepted,
        dry_run: true,
      };
      self.record_order();
      info!(
        order_id = %placement.order_id,
        symbols = ?order.legs.iter().map(|l| l.symbol.as_str()).collect::<Vec<_>>(),
        credit = order.is_credit,
        "Dry run: order not sent"
      );
      return Ok(Some(placement));
    }

    let placement = self
      .broker
      .place_order(order)
      .await
      .context("Failed to place order")?;
    self.record_order();

    info!(
      order_id = %placement.order_id,
      status = ?placement.status,
      "Order placed"
    );
    Ok(Some(placement))
  }

  /// Cancel every open order created at least `max_age` before `now`.
  ///
  /// Individual cancel failures land in the report; only a failure to
  /// list orders is an error.
  #[instrument(skip(self), fields(max_age_minutes = max_age.num_minutes()))]
  pub async fn cleanup_stale_orders(
    &self,
    now: DateTime<Utc>,
    max_age: chrono::Duration,
  ) -> Result<CleanupReport> {
    self.sweep(now, Some(max_age)).await
  }

  /// Cancel all open orders (for graceful shutdown).
  #[instrument(skip(self))]
  pub async fn cancel_all(&self) -> Result<CleanupReport> {
    self.sweep(Utc::now(), None).await
  }

  async fn sweep(
    &self,
    now: DateTime<Utc>,
    max_age: Option<chrono::Duration>,
  ) -> Result<CleanupReport> {
    let orders = self
      .broker
      .open_orders()
      .await
      .context("Failed to list open orders")?;

    let mut report = CleanupReport {
      inspected: orders.len(),
      ..CleanupReport::default()
    };

    let due = orders
      .iter()
      .filter(|o| max_age.is_none_or(|age| now - o.created_at >= age));

    for order in due {
      let age_minutes = (now - order.created_at).num_minutes();
      if self.dry_run {
        info!(order_id = %order.id, age_minutes, "Dry run: stale order not cancelled");
        continue;
      }
      match self.broker.cancel_order(&order.id).await {
        Ok(result) if result.success => {
          info!(order_id = %order.id, age_minutes, "Stale order cancelled");
          report.cancelled.push(order.id.clone());
        }
        Ok(result) => {
          let reason = result.error.unwrap_or_else(|| "cancel rejected".to_string());
          warn!(order_id = %order.id, reason = %reason, "Stale order not cancelled");
          report.failed.push((order.id.clone(), reason));
        }
        Err(e) => {
          warn!(order_id = %order.id, error = %e, "Stale order cancel failed");
          report.failed.push((order.id.clone(), format!("{e:#}")));
        }
      }
    }

    info!(
      inspected = report.inspected,
      cancelled = report.cancelled.len(),
      failed = report.failed.len(),
      "Order sweep complete"
    );
    Ok(report)
  }

  /// Check if we're within rate limits.
  fn check_rate_limit(&mut self) -> bool {
    let now = Instant::now();
    // Remove timestamps older than 1 minute
    self
      .order_timestamps
      .retain(|t| now.duration_since(*t).as_secs() < 60);

    self.order_timestamps.len() < self.max_orders_per_minute as usize
  }

  /// Record an order placement for rate limiting.
  fn record_order(&mut self) {
    let now = Instant::now();
    self.order_timestamps.push(now);
    self.last_order_time = Some(now);
  }
}
