//! Brokerage Port - Account, Market Data and Order Interface
//!
//! Defines the trait the use cases need from an options brokerage:
//! account state, open positions and orders, order placement and
//! cancellation, daily closes, spot price and quoted option chains.
//!
//! Key design decisions:
//! - Boundary types carry parsed numerics, never wire strings
//! - Every quote used to price an order comes through this port
//! - Limit prices are positive here; the adapter applies wire signs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::strategy::OptionQuote;
use crate::domain::trade::{OptionContract, OptionOrder, OrderId, OrderSide, OrderStatus};

/// Account balances and flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
  /// Total account equity.
  pub equity: f64,
  /// Equity at the previous close.
  pub last_equity: f64,
  /// Overall buying power.
  pub buying_power: f64,
  /// Buying power available for option collateral.
  pub options_buying_power: f64,
  /// Settled cash.
  pub cash: f64,
  /// Day trades in the rolling five-day window.
  pub daytrade_count: u32,
  /// Flagged as a pattern day trader.
  pub pattern_day_trader: bool,
  /// Account cannot place orders.
  pub trading_blocked: bool,
  /// Broker account status string.
  pub status: String,
}

impl AccountSnapshot {
  /// Equity change since the previous close.
  pub fn day_change(&self) -> f64 {
    self.equity - self.last_equity
  }
}

/// An open position as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
  /// Equity ticker or OCC option symbol.
  pub symbol: String,
  /// Signed quantity (negative for short).
  pub qty: f64,
  /// Long or short.
  pub side: PositionSide,
  /// Average entry price per share.
  pub avg_entry_price: f64,
  /// Latest mark per share.
  pub current_price: f64,
  /// Unrealised P/L in dollars.
  pub unrealized_pl: f64,
  /// Broker asset class, e.g. `us_option`.
  pub asset_class: String,
}

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
  Long,
  Short,
}

impl BrokerPosition {
  /// Whether this is an option position.
  pub fn is_option(&self) -> bool {
    self.asset_class == "us_option"
  }

  /// Parsed contract for option positions.
  pub fn contract(&self) -> Option<OptionContract> {
    if !self.is_option() {
      return None;
    }
    OptionContract::parse_occ(&self.symbol).ok()
  }

  /// Underlying ticker (the symbol itself for equities).
  pub fn underlying(&self) -> String {
    self
      .contract()
      .map_or_else(|| self.symbol.clone(), |c| c.underlying)
  }

  pub fn is_short(&self) -> bool {
    self.side == PositionSide::Short
  }

  /// Side that flattens this position.
  pub fn closing_side(&self) -> OrderSide {
    if self.is_short() {
      OrderSide::Buy
    } else {
      OrderSide::Sell
    }
  }
}

/// A working order on the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
  /// Broker order ID.
  pub id: OrderId,
  /// Client-assigned idempotency key.
  pub client_order_id: String,
  /// Leg symbols (single symbol for plain orders).
  pub symbols: Vec<String>,
  pub status: OrderStatus,
  /// Submission time.
  pub created_at: DateTime<Utc>,
  /// Limit price as reported (signed for multi-leg credits).
  pub limit_price: Option<f64>,
}

/// Result of an order placement attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlacement {
  /// Assigned order ID from the broker.
  pub order_id: OrderId,
  /// Echo of the client order ID.
  pub client_order_id: String,
  /// Status immediately after submission.
  pub status: OrderStatus,
  /// Whether the placement was synthetic (dry run).
  pub dry_run: bool,
}

/// Result of an order cancellation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancellation {
  /// The order ID that was cancelled.
  pub order_id: OrderId,
  /// Whether cancellation succeeded.
  pub success: bool,
  /// Error message if cancellation failed.
  pub error: Option<String>,
}

/// Trait for options brokerage providers.
///
/// Implementors wrap a brokerage REST API. Errors are returned,
/// never swallowed: a failed call is an `Err`, not an empty list.
#[async_trait]
pub trait Brokerage: Send + Sync + 'static {
  /// Current account balances and flags.
  async fn account(&self) -> anyhow::Result<AccountSnapshot>;

  /// All open positions (equity and option).
  async fn positions(&self) -> anyhow::Result<Vec<BrokerPosition>>;

  /// All working orders.
  async fn open_orders(&self) -> anyhow::Result<Vec<OpenOrder>>;

  /// Submit a limit order.
  ///
  /// # Errors
  /// Returns error if the broker rejects the order or the call fails.
  async fn place_order(&self, order: &OptionOrder) -> anyhow::Result<OrderPlacement>;

  /// Cancel a single order by ID.
  async fn cancel_order(&self, order_id: &str) -> anyhow::Result<OrderCancellation>;

  /// Daily closing prices, oldest first, at most `lookback` bars.
  async fn daily_closes(&self, symbol: &str, lookback: usize) -> anyhow::Result<Vec<f64>>;

  /// Latest trade price for an equity.
  async fn latest_price(&self, symbol: &str) -> anyhow::Result<f64>;

  /// Quoted option chain for expirations in `[from, to]`.
  async fn option_chain(
    &self,
    underlying: &str,
    from: NaiveDate,
    to: NaiveDate,
  ) -> anyhow::Result<Vec<OptionQuote>>;

  /// Check if the brokerage connection is healthy.
  async fn is_healthy(&self) -> bool;
}
