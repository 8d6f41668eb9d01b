//! Repository Port - State Persistence Interface
//!
//! Defines traits for persisting bot state using JSONL files.
//! No database dependency - lightweight append-only log format
//! for the trade journal, the gate decision log and daily P&L,
//! plus an atomic snapshot shared by every scheduled job.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::risk::RiskState;
use crate::domain::strategy::StrategyKind;
use crate::domain::trade::{ExitReason, OrderId};
use crate::ports::brokerage::BrokerPosition;

/// Whether a journal entry opened or closed exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
  Open,
  Close,
}

/// A single trade record for persistence and auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
  /// Unique trade identifier.
  pub id: String,
  /// Associated broker order ID.
  pub order_id: OrderId,
  /// Client-assigned order ID.
  pub client_order_id: String,
  /// Underlying ticker.
  pub underlying: String,
  /// Strategy, when known (closes of adopted positions have none).
  pub strategy: Option<StrategyKind>,
  pub action: TradeAction,
  /// OCC symbols of every leg.
  pub symbols: Vec<String>,
  /// Contracts / spreads.
  pub qty: u32,
  /// Per-share limit (positive).
  pub limit_price: f64,
  /// True when the order collected premium.
  pub is_credit: bool,
  /// Realised P/L in dollars (closes only).
  pub realized_pnl: Option<f64>,
  /// Exit reason (closes only).
  pub exit_reason: Option<String>,
  /// Advisor rationale (opens only).
  pub rationale: Option<String>,
  /// Synthetic placement, nothing sent to the broker.
  pub dry_run: bool,
  pub timestamp: DateTime<Utc>,
}

/// One gate's outcome inside a decision record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedVerdict {
  pub gate: String,
  pub passed: bool,
  pub reason: String,
}

/// Gate pipeline outcome for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
  pub id: String,
  pub underlying: String,
  pub strategy: StrategyKind,
  /// True when all four gates passed.
  pub approved: bool,
  /// Gate that stopped the pipeline.
  pub rejected_by: Option<String>,
  /// Verdicts in evaluation order.
  pub verdicts: Vec<RecordedVerdict>,
  /// Net credit per share at decision time.
  pub net_credit: f64,
  /// Collateral the broker would hold.
  pub collateral: f64,
  pub timestamp: DateTime<Utc>,
}

/// Daily P&L summary for risk monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPnl {
  /// Eastern trading date.
  pub date: NaiveDate,
  /// Equity at the end of the day.
  pub equity: f64,
  /// Equity at the previous close.
  pub last_equity: f64,
  /// Equity change.
  pub pnl: f64,
  /// Realised P/L from journalled closes.
  pub realized_pnl: f64,
  /// Journalled trades on that date.
  pub trade_count: u64,
}

/// Snapshot format version written by this build.
pub const STATE_VERSION: &str = "1";

/// Bot state snapshot shared across scheduled jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotStateSnapshot {
  /// Version of the state format.
  pub version: String,
  /// When the snapshot was taken.
  pub timestamp: DateTime<Utc>,
  /// Eastern trading date of the snapshot.
  pub trading_date: NaiveDate,
  pub equity: f64,
  pub last_equity: f64,
  pub options_buying_power: f64,
  /// Symbols of open positions.
  pub position_symbols: Vec<String>,
  /// IDs of working orders.
  pub open_order_ids: Vec<OrderId>,
  /// Daily loss and circuit breaker.
  #[serde(default)]
  pub risk: RiskState,
  /// Eastern date of the last opening order.
  #[serde(default)]
  pub last_entry_date: Option<NaiveDate>,
  /// Closes sent but not yet seen filled.
  #[serde(default)]
  pub pending_closes: Vec<PendingClose>,
}

impl BotStateSnapshot {
  /// Snapshot with no broker data yet.
  pub fn empty(now: DateTime<Utc>, today: NaiveDate) -> Self {
    Self {
      version: STATE_VERSION.to_string(),
      timestamp: now,
      trading_date: today,
      equity: 0.0,
      last_equity: 0.0,
      options_buying_power: 0.0,
      position_symbols: Vec::new(),
      open_order_ids: Vec::new(),
      risk: RiskState::default(),
      last_entry_date: None,
      pending_closes: Vec::new(),
    }
  }
}

/// A closing order whose fill has not been observed.
///
/// Its P/L is booked once, when the leg leaves the broker's positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingClose {
  pub order_id: OrderId,
  pub client_order_id: String,
  pub underlying: String,
  pub reason: ExitReason,
  /// The leg as it stood when the close was sent.
  pub position: BrokerPosition,
  pub qty: u32,
  pub limit_price: f64,
  pub is_credit: bool,
  /// P/L if the close fills at its limit.
  pub expected_pnl: f64,
  pub submitted_at: DateTime<Utc>,
}

/// Trait for state persistence providers.
///
/// Uses JSONL (JSON Lines) format for append-only logging.
/// Each line is a self-contained JSON record, making it easy
/// to parse, stream, and recover from partial writes.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
  /// Append a trade record to the trade log.
  async fn save_trade(&self, record: &TradeRecord) -> anyhow::Result<()>;

  /// Load all trade records (for recovery/analysis).
  async fn load_trades(&self) -> anyhow::Result<Vec<TradeRecord>>;

  /// Append a gate decision to the decision log.
  async fn save_decision(&self, record: &DecisionRecord) -> anyhow::Result<()>;

  /// Load all decision records.
  async fn load_decisions(&self) -> anyhow::Result<Vec<DecisionRecord>>;

  /// Save a bot state snapshot.
  async fn save_state(&self, state: &BotStateSnapshot) -> anyhow::Result<()>;

  /// Load the most recent bot state snapshot.
  async fn load_latest_state(&self) -> anyhow::Result<Option<BotStateSnapshot>>;

  /// Save daily P&L record.
  async fn save_daily_pnl(&self, pnl: &DailyPnl) -> anyhow::Result<()>;

  /// Load daily P&L history.
  async fn load_daily_pnl(&self) -> anyhow::Result<Vec<DailyPnl>>;

  /// Check if the repository is healthy (disk space, permissions).
  async fn is_healthy(&self) -> bool;
}
