//! State Sync - Broker to Snapshot Reconciliation
//!
//! Pulls account, positions and open orders from the broker, logs what
//! changed since the last snapshot, closes out the previous trading day
//! in the P&L journal and writes a fresh snapshot.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::domain::market_hours::{MarketCalendar, to_eastern};
use crate::domain::risk::RiskState;
use crate::ports::brokerage::{AccountSnapshot, Brokerage};
use crate::ports::repository::{
  BotStateSnapshot, DailyPnl, Repository, STATE_VERSION, TradeRecord,
};

use super::risk_manager::SharedRiskManager;

/// What one sync observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
  pub trading_date: NaiveDate,
  pub account: AccountSnapshot,
  /// All positions, equities included.
  pub positions: usize,
  pub option_positions: usize,
  pub open_orders: usize,
  /// Symbols not present in the previous snapshot.
  pub opened: Vec<String>,
  /// Symbols gone since the previous snapshot.
  pub closed: Vec<String>,
  /// P&L row written for the previous trading day, if this sync crossed a day.
  pub closed_day: Option<DailyPnl>,
}

/// Broker-to-snapshot synchroniser.
pub struct StateSync<B: Brokerage, R: Repository> {
  broker: Arc<B>,
  repo: Arc<R>,
  calendar: MarketCalendar,
  risk: SharedRiskManager,
}

impl<B: Brokerage, R: Repository> StateSync<B, R> {
  pub fn new(broker: Arc<B>, repo: Arc<R>, calendar: MarketCalendar, risk: SharedRiskManager) -> Self {
    Self {
      broker,
      repo,
      calendar,
      risk,
    }
  }

  /// Run one sync.
  #[instrument(skip(self))]
  pub async fn run(&self, now: DateTime<Utc>) -> Result<SyncReport> {
    let account = self.broker.account().await.context("Failed to load account")?;
    let positions = self
      .broker
      .positions()
      .await
      .context("Failed to load positions")?;
    let orders = self
      .broker
      .open_orders()
      .await
      .context("Failed to load open orders")?;
    let previous = self
      .repo
      .load_latest_state()
      .await
      .context("Failed to load previous snapshot")?;

    let today = self.calendar.eastern_date(now);
    let symbols: BTreeSet<String> = positions.iter().map(|p| p.symbol.clone()).collect();
    let before: BTreeSet<String> = previous
      .as_ref()
      .map(|p| p.position_symbols.iter().cloned().collect())
      .unwrap_or_default();
    let opened: Vec<String> = symbols.difference(&before).cloned().collect();
    let closed: Vec<String> = before.difference(&symbols).cloned().collect();

    for symbol in &opened {
      info!(symbol = %symbol, "Position opened since last sync");
    }
    for symbol in &closed {
      info!(symbol = %symbol, "Position closed since last sync");
    }

    let mut closed_day = None;
    if let Some(prev) = previous.as_ref().filter(|p| p.trading_date != today) {
      let trades = self.repo.load_trades().await.context("Failed to load trades")?;
      let pnl = previous_day_pnl(prev, account.last_equity, &trades);
      self
        .repo
        .save_daily_pnl(&pnl)
        .await
        .context("Failed to save daily P&L")?;
      info!(
        date = %pnl.date,
        pnl = pnl.pnl,
        realized = pnl.realized_pnl,
        trades = pnl.trade_count,
        "Closed out trading day"
      );
      closed_day = Some(pnl);
    }

    let risk = {
      let mut risk = self.risk.lock().await;
      risk.roll_day(today, account.equity);
      risk.state().clone()
    };

    let snapshot = BotStateSnapshot {
      version: STATE_VERSION.to_string(),
      timestamp: now,
      trading_date: today,
      equity: account.equity,
      last_equity: account.last_equity,
      options_buying_power: account.options_buying_power,
      position_symbols: symbols.iter().cloned().collect(),
      open_order_ids: orders.iter().map(|o| o.id.clone()).collect(),
      risk,
      last_entry_date: previous.as_ref().and_then(|p| p.last_entry_date),
      pending_closes: previous.map(|p| p.pending_closes).unwrap_or_default(),
    };
    self
      .repo
      .save_state(&snapshot)
      .await
      .context("Failed to save snapshot")?;

    info!(
      equity = account.equity,
      positions = positions.len(),
      open_orders = orders.len(),
      "State synced"
    );

    Ok(SyncReport {
      trading_date: today,
      positions: positions.len(),
      option_positions: positions.iter().filter(|p| p.is_option()).count(),
      account,
      open_orders: orders.len(),
      opened,
      closed,
      closed_day,
    })
  }
}

/// P&L row for the snapshot's day.
///
/// The broker's `last_equity` on the new day is the previous close.
fn previous_day_pnl(prev: &BotStateSnapshot, closing_equity: f64, trades: &[TradeRecord]) -> DailyPnl {
  let day_trades: Vec<&TradeRecord> = trades
    .iter()
    .filter(|t| !t.dry_run && to_eastern(t.timestamp).date_naive() == prev.trading_date)
    .collect();
  DailyPnl {
    date: prev.trading_date,
    equity: closing_equity,
    last_equity: prev.last_equity,
    pnl: closing_equity - prev.last_equity,
    realized_pnl: day_trades.iter().filter_map(|t| t.realized_pnl).sum(),
    trade_count: day_trades.len() as u64,
  }
}

/// Write the risk counters into the latest snapshot and apply
/// `update`, without touching the broker.
pub async fn record_progress<R, F>(
  repo: &R,
  now: DateTime<Utc>,
  today: NaiveDate,
  risk: &RiskState,
  update: F,
) -> Result<()>
where
  R: Repository,
  F: FnOnce(&mut BotStateSnapshot),
{
  let mut snapshot = repo
    .load_latest_state()
    .await
    .context("Failed to load snapshot")?
    .unwrap_or_else(|| BotStateSnapshot::empty(now, today));

  snapshot.timestamp = now;
  snapshot.risk = risk.clone();
  update(&mut snapshot);
  repo.save_state(&snapshot).await.context("Failed to save snapshot")
}
