//! Position Manager - Exit Rules for Open Option Legs
//!
//! Walks every open option position and closes the ones that hit an
//! exit rule. A close is booked once its leg is gone from the broker:
//! only then is it journaled with its realised P/L, fed to the risk
//! manager, and turned into a lesson when it lost money. Closes still
//! waiting for a fill ride along in the state snapshot.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::lesson::{Lesson, Severity};
use crate::domain::market_hours::{MarketCalendar, to_eastern};
pub use crate::domain::trade::ExitReason;
use crate::domain::trade::{
  CONTRACT_MULTIPLIER, OptionContract, OptionOrder, OrderId, OrderLeg, PositionIntent, TimeInForce,
  round_to_cent,
};
use crate::ports::brokerage::{BrokerPosition, Brokerage};
use crate::ports::lessons::LessonStore;
use crate::ports::repository::{PendingClose, Repository, TradeAction, TradeRecord};

use super::order_manager::OrderManager;
use super::risk_manager::SharedRiskManager;
use super::state_sync::record_progress;

/// Smallest limit the broker accepts for an option order.
const MIN_TICK: f64 = 0.01;

/// Thresholds for the exit rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitRules {
  /// Fraction of the entry credit captured that closes a short.
  pub profit_target_pct: f64,
  /// Loss as a multiple of the entry credit that closes a short.
  pub stop_loss_multiple: f64,
  /// Close at or below this many days to expiry.
  pub exit_dte: i64,
}

impl ExitRules {
  /// Pick the exit for one leg, if any.
  ///
  /// `short_expiries` holds (underlying, expiration) pairs that still
  /// have a short leg open.
  pub fn evaluate(
    &self,
    position: &BrokerPosition,
    contract: &OptionContract,
    today: NaiveDate,
    short_expiries: &BTreeSet<(String, NaiveDate)>,
  ) -> Option<ExitReason> {
    if contract.days_to_expiry(today) <= self.exit_dte {
      return Some(ExitReason::Expiry);
    }

    if position.is_short() {
      let credit = position.avg_entry_price;
      if credit <= 0.0 {
        return None;
      }
      let gain = credit - position.current_price;
      if gain >= self.profit_target_pct * credit {
        return Some(ExitReason::ProfitTarget);
      }
      if -gain >= self.stop_loss_multiple * credit {
        return Some(ExitReason::StopLoss);
      }
      return None;
    }

    let key = (contract.underlying.clone(), contract.expiration);
    (!short_expiries.contains(&key)).then_some(ExitReason::OrphanedLong)
  }
}

/// P/L realised by flattening `position` at its current price.
pub fn realized_pnl(position: &BrokerPosition) -> f64 {
  let per_share = if position.is_short() {
    position.avg_entry_price - position.current_price
  } else {
    position.current_price - position.avg_entry_price
  };
  per_share * position.qty.abs() * CONTRACT_MULTIPLIER
}

/// Single-leg closing order at the current price.
pub fn closing_order(position: &BrokerPosition, client_order_id: impl Into<String>) -> OptionOrder {
  let side = position.closing_side();
  OptionOrder {
    client_order_id: client_order_id.into(),
    legs: vec![OrderLeg {
      symbol: position.symbol.clone(),
      side,
      intent: PositionIntent::close(side),
      ratio_qty: 1,
    }],
    qty: position.qty.abs().round() as u32,
    limit_price: round_to_cent(position.current_price).max(MIN_TICK),
    is_credit: !position.is_short(),
    time_in_force: TimeInForce::Day,
  }
}

/// One close, submitted or booked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedPosition {
  pub symbol: String,
  pub reason: ExitReason,
  pub order_id: OrderId,
  /// P/L at the closing limit.
  pub pnl: f64,
  pub dry_run: bool,
}

impl From<&PendingClose> for ClosedPosition {
  fn from(close: &PendingClose) -> Self {
    Self {
      symbol: close.position.symbol.clone(),
      reason: close.reason,
      order_id: close.order_id.clone(),
      pnl: close.expected_pnl,
      dry_run: false,
    }
  }
}

/// Result of one management pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ManageReport {
  /// Option positions examined.
  pub inspected: usize,
  /// Closes submitted this pass.
  pub closed: Vec<ClosedPosition>,
  /// Earlier closes whose legs are gone, booked this pass.
  pub settled: Vec<ClosedPosition>,
  /// Earlier closes that lapsed unfilled with the leg still open.
  pub lapsed: Vec<String>,
  /// Positions due for exit but left alone, with the reason.
  pub skipped: Vec<(String, String)>,
  pub failed: Vec<(String, String)>,
}

/// Exit-management use case.
pub struct PositionManager<B: Brokerage, R: Repository, L: LessonStore> {
  broker: Arc<B>,
  repo: Arc<R>,
  lessons: Arc<L>,
  orders: OrderManager<B>,
  risk: SharedRiskManager,
  calendar: MarketCalendar,
  rules: ExitRules,
}

impl<B: Brokerage, R: Repository, L: LessonStore> PositionManager<B, R, L> {
  pub fn new(
    config: &AppConfig,
    broker: Arc<B>,
    repo: Arc<R>,
    lessons: Arc<L>,
    risk: SharedRiskManager,
    dry_run: bool,
  ) -> Result<Self> {
    let calendar = MarketCalendar::from_strings(&config.schedule.holidays, &config.schedule.half_days)?;
    let orders = OrderManager::new(Arc::clone(&broker), &config.orders, dry_run);
    Ok(Self {
      broker,
      repo,
      lessons,
      orders,
      risk,
      calendar,
      rules: ExitRules {
        profit_target_pct: config.strategy.profit_target_pct,
        stop_loss_multiple: config.strategy.stop_loss_multiple,
        exit_dte: config.strategy.exit_dte,
      },
    })
  }

  /// Run one exit pass over open option positions.
  #[instrument(skip(self), fields(dry_run = self.orders.is_dry_run()))]
  pub async fn run_once(&mut self, now: DateTime<Utc>) -> Result<ManageReport> {
    let today = self.calendar.eastern_date(now);
    let positions = self
      .broker
      .positions()
      .await
      .context("Failed to load positions")?;
    let open_orders = self
      .broker
      .open_orders()
      .await
      .context("Failed to load open orders")?;
    let pending = self
      .repo
      .load_latest_state()
      .await
      .context("Failed to load snapshot")?
      .map(|s| s.pending_closes)
      .unwrap_or_default();

    let working: HashSet<String> = open_orders
      .iter()
      .flat_map(|o| o.symbols.iter().cloned())
      .collect();
    let working_ids: HashSet<&str> = open_orders.iter().map(|o| o.id.as_str()).collect();
    let held: HashSet<&str> = positions.iter().map(|p| p.symbol.as_str()).collect();

    let mut report = ManageReport::default();

    // ── 1. Book closes whose legs are gone ──
    let mut still_pending = Vec::with_capacity(pending.len());
    for close in pending {
      if !held.contains(close.position.symbol.as_str()) {
        self.settle(&close, now).await?;
        report.settled.push(ClosedPosition::from(&close));
      } else if working_ids.contains(close.order_id.as_str()) {
        still_pending.push(close);
      } else {
        info!(
          symbol = %close.position.symbol,
          order_id = %close.order_id,
          "Close lapsed unfilled, leg still open"
        );
        report.lapsed.push(close.position.symbol);
      }
    }

    // ── 2. Pick exits ──
    let options: Vec<(BrokerPosition, OptionContract)> = positions
      .into_iter()
      .filter(|p| p.is_option())
      .filter_map(|p| match p.contract() {
        Some(c) => Some((p, c)),
        None => {
          warn!(symbol = %p.symbol, "Unparseable option symbol");
          None
        }
      })
      .collect();
    let short_expiries: BTreeSet<(String, NaiveDate)> = options
      .iter()
      .filter(|(p, _)| p.is_short())
      .map(|(_, c)| (c.underlying.clone(), c.expiration))
      .collect();
    report.inspected = options.len();

    // ── 3. Submit closes ──
    for (position, contract) in &options {
      let Some(reason) = self.rules.evaluate(position, contract, today, &short_expiries) else {
        debug!(symbol = %position.symbol, pl = position.unrealized_pl, "Holding");
        continue;
      };
      if working.contains(&position.symbol) {
        info!(symbol = %position.symbol, reason = %reason, "Close already working");
        report
          .skipped
          .push((position.symbol.clone(), "order already working".to_string()));
        continue;
      }

      match self.close(position, contract, reason, now).await {
        Ok(Some((closed, pending))) => {
          report.closed.push(closed);
          still_pending.extend(pending);
        }
        Ok(None) => report
          .skipped
          .push((position.symbol.clone(), "order rate limit".to_string())),
        Err(e) => {
          warn!(symbol = %position.symbol, error = %e, "Close failed");
          report.failed.push((position.symbol.clone(), format!("{e:#}")));
        }
      }
    }

    // ── 4. Persist risk and the closes still waiting ──
    let risk_state = self.risk.lock().await.state().clone();
    let waiting = still_pending.len();
    record_progress(self.repo.as_ref(), now, today, &risk_state, move |snapshot| {
      snapshot.pending_closes = still_pending;
    })
    .await?;

    info!(
      inspected = report.inspected,
      closed = report.closed.len(),
      settled = report.settled.len(),
      pending = waiting,
      failed = report.failed.len(),
      "Position management complete"
    );
    Ok(report)
  }

  /// Send a closing order. A live close comes back as pending; a dry
  /// run is journaled at once and never booked.
  async fn close(
    &mut self,
    position: &BrokerPosition,
    contract: &OptionContract,
    reason: ExitReason,
    now: DateTime<Utc>,
  ) -> Result<Option<(ClosedPosition, Option<PendingClose>)>> {
    let client_order_id = format!("ogb-close-{}", Uuid::new_v4().simple());
    let order = closing_order(position, client_order_id);
    let Some(placement) = self.orders.submit(&order).await? else {
      return Ok(None);
    };
    let pnl = realized_pnl(position);

    info!(
      symbol = %position.symbol,
      reason = %reason,
      expected_pnl = pnl,
      order_id = %placement.order_id,
      "Position close submitted"
    );

    let closed = ClosedPosition {
      symbol: position.symbol.clone(),
      reason,
      order_id: placement.order_id.clone(),
      pnl,
      dry_run: placement.dry_run,
    };
    let pending = PendingClose {
      order_id: placement.order_id,
      client_order_id: placement.client_order_id,
      underlying: contract.underlying.clone(),
      reason,
      position: position.clone(),
      qty: order.qty,
      limit_price: order.limit_price,
      is_credit: order.is_credit,
      expected_pnl: pnl,
      submitted_at: now,
    };

    if placement.dry_run {
      self
        .repo
        .save_trade(&close_record(&pending, true, now))
        .await
        .context("Failed to journal close")?;
      return Ok(Some((closed, None)));
    }
    Ok(Some((closed, Some(pending))))
  }

  /// Book a filled close: journal, risk counters, lesson.
  async fn settle(&self, close: &PendingClose, now: DateTime<Utc>) -> Result<()> {
    self
      .repo
      .save_trade(&close_record(close, false, now))
      .await
      .context("Failed to journal close")?;
    self.risk.lock().await.record_trade(close.expected_pnl, now);

    info!(
      symbol = %close.position.symbol,
      reason = %close.reason,
      pnl = close.expected_pnl,
      order_id = %close.order_id,
      "Position close booked"
    );

    let lesson = close
      .position
      .contract()
      .and_then(|c| exit_lesson(&close.position, &c, close.reason, close.expected_pnl, now));
    if let Some(lesson) = lesson {
      // The close is booked; a lesson failure is only logged.
      if let Err(e) = self.lessons.record(&lesson).await {
        warn!(symbol = %close.position.symbol, error = %e, "Failed to record exit lesson");
      }
    }
    Ok(())
  }
}

/// Journal row for a close.
fn close_record(close: &PendingClose, dry_run: bool, now: DateTime<Utc>) -> TradeRecord {
  TradeRecord {
    id: Uuid::new_v4().to_string(),
    order_id: close.order_id.clone(),
    client_order_id: close.client_order_id.clone(),
    underlying: close.underlying.clone(),
    strategy: None,
    action: TradeAction::Close,
    symbols: vec![close.position.symbol.clone()],
    qty: close.qty,
    limit_price: close.limit_price,
    is_credit: close.is_credit,
    realized_pnl: Some(close.expected_pnl),
    exit_reason: Some(close.reason.to_string()),
    rationale: None,
    dry_run,
    timestamp: now,
  }
}

/// Lesson for a stop-loss or losing close.
fn exit_lesson(
  position: &BrokerPosition,
  contract: &OptionContract,
  reason: ExitReason,
  pnl: f64,
  now: DateTime<Utc>,
) -> Option<Lesson> {
  let severity = match reason {
    ExitReason::StopLoss => Severity::High,
    _ if pnl < 0.0 => Severity::Medium,
    _ => return None,
  };
  let leg = if position.is_short() { "short" } else { "long" };
  let title = format!("{} {} {} {}", contract.underlying, leg, contract.option_type, reason);
  let body = format!(
    "Closed {} {} at {:.2} against entry {:.2} with {} days left, realised {pnl:.2}.",
    leg,
    position.symbol,
    position.current_price,
    position.avg_entry_price,
    contract.days_to_expiry(to_eastern(now).date_naive()),
  );
  let tags = vec![
    contract.underlying.clone(),
    reason.to_string(),
    contract.option_type.to_string(),
  ];
  Some(Lesson::new(title, body, severity, tags, now))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::trade::{OptionType, OrderSide};
  use crate::ports::brokerage::PositionSide;
  use rust_decimal::Decimal;

  fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
  }

  fn rules() -> ExitRules {
    ExitRules {
      profit_target_pct: 0.5,
      stop_loss_multiple: 2.0,
      exit_dte: 7,
    }
  }

  fn position(strike: i64, kind: OptionType, side: PositionSide, entry: f64, current: f64, dte: i64) -> (BrokerPosition, OptionContract) {
    let contract = OptionContract::new("SPY", today() + chrono::Duration::days(dte), Decimal::from(strike), kind);
    let qty = if side == PositionSide::Short { -1.0 } else { 1.0 };
    let position = BrokerPosition {
      symbol: contract.occ_symbol(),
      qty,
      side,
      avg_entry_price: entry,
      current_price: current,
      unrealized_pl: 0.0,
      asset_class: "us_option".to_string(),
    };
    (position, contract)
  }

  fn shorts(c: &OptionContract) -> BTreeSet<(String, NaiveDate)> {
    BTreeSet::from([(c.underlying.clone(), c.expiration)])
  }

  #[test]
  fn test_short_profit_target_and_stop() {
    let (win, c) = position(500, OptionType::Put, PositionSide::Short, 2.0, 0.9, 30);
    assert_eq!(rules().evaluate(&win, &c, today(), &shorts(&c)), Some(ExitReason::ProfitTarget));

    let (hold, c) = position(500, OptionType::Put, PositionSide::Short, 2.0, 1.5, 30);
    assert_eq!(rules().evaluate(&hold, &c, today(), &shorts(&c)), None);

    let (lose, c) = position(500, OptionType::Put, PositionSide::Short, 2.0, 6.0, 30);
    assert_eq!(rules().evaluate(&lose, &c, today(), &shorts(&c)), Some(ExitReason::StopLoss));
  }

  #[test]
  fn test_expiry_wins_over_hold() {
    let (p, c) = position(500, OptionType::Put, PositionSide::Short, 2.0, 1.8, 7);
    assert_eq!(rules().evaluate(&p, &c, today(), &shorts(&c)), Some(ExitReason::Expiry));
  }

  #[test]
  fn test_orphaned_long() {
    let (long, c) = position(490, OptionType::Put, PositionSide::Long, 1.0, 0.4, 30);
    assert_eq!(rules().evaluate(&long, &c, today(), &shorts(&c)), None);
    assert_eq!(
      rules().evaluate(&long, &c, today(), &BTreeSet::new()),
      Some(ExitReason::OrphanedLong)
    );
  }

  #[test]
  fn test_closing_order_and_pnl() {
    let (short, _) = position(500, OptionType::Put, PositionSide::Short, 2.0, 0.904, 30);
    let order = closing_order(&short, "x");
    assert_eq!(order.legs[0].side, OrderSide::Buy);
    assert_eq!(order.legs[0].intent, PositionIntent::BuyToClose);
    assert_eq!(order.qty, 1);
    assert_eq!(order.limit_price, 0.9);
    assert!(!order.is_credit);
    assert!((realized_pnl(&short) - 109.6).abs() < 1e-9);

    let (long, _) = position(490, OptionType::Put, PositionSide::Long, 1.0, 0.0, 30);
    let order = closing_order(&long, "y");
    assert_eq!(order.legs[0].intent, PositionIntent::SellToClose);
    assert_eq!(order.limit_price, MIN_TICK);
    assert!((realized_pnl(&long) + 100.0).abs() < 1e-9);
  }

  #[test]
  fn test_exit_lessons_by_outcome() {
    let now = Utc::now();
    let (p, c) = position(500, OptionType::Put, PositionSide::Short, 2.0, 6.0, 30);
    let stop = exit_lesson(&p, &c, ExitReason::StopLoss, -400.0, now).unwrap();
    assert_eq!(stop.severity, Severity::High);
    assert!(stop.tags.contains(&"stop_loss".to_string()));

    let loss = exit_lesson(&p, &c, ExitReason::Expiry, -20.0, now).unwrap();
    assert_eq!(loss.severity, Severity::Medium);

    assert!(exit_lesson(&p, &c, ExitReason::ProfitTarget, 100.0, now).is_none());
  }
}
