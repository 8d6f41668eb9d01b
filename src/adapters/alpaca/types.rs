//! Alpaca API Request/Response Types
//!
//! Serde schemas for the Alpaca trading and market data APIs, plus the
//! conversions into port boundary types. Trading API numerics arrive as
//! JSON strings and are parsed explicitly; a malformed number is a decode
//! error, never a silent zero.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BrokerError;
use crate::domain::strategy::OptionQuote;
use crate::domain::trade::{
  OptionContract, OptionOrder, OrderSide, OrderStatus, PositionIntent, TimeInForce,
};
use crate::ports::brokerage::{AccountSnapshot, BrokerPosition, OpenOrder, PositionSide};

/// Parse a string-encoded number field.
pub fn parse_num(field: &str, value: &str) -> Result<f64, BrokerError> {
  value
    .trim()
    .parse::<f64>()
    .ok()
    .filter(|v| v.is_finite())
    .ok_or_else(|| BrokerError::Decode(format!("{field} is not a number: {value:?}")))
}

fn parse_opt(field: &str, value: Option<&String>) -> Result<f64, BrokerError> {
  value.map_or(Ok(0.0), |v| parse_num(field, v))
}

/// `GET /v2/account`
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
  pub equity: String,
  pub last_equity: String,
  pub buying_power: String,
  /// Absent on accounts without options approval.
  pub options_buying_power: Option<String>,
  pub cash: String,
  #[serde(default)]
  pub daytrade_count: u32,
  #[serde(default)]
  pub pattern_day_trader: bool,
  #[serde(default)]
  pub trading_blocked: bool,
  pub status: String,
}

impl TryFrom<AccountResponse> for AccountSnapshot {
  type Error = BrokerError;

  fn try_from(raw: AccountResponse) -> Result<Self, Self::Error> {
    Ok(Self {
      equity: parse_num("equity", &raw.equity)?,
      last_equity: parse_num("last_equity", &raw.last_equity)?,
      buying_power: parse_num("buying_power", &raw.buying_power)?,
      options_buying_power: parse_opt("options_buying_power", raw.options_buying_power.as_ref())?,
      cash: parse_num("cash", &raw.cash)?,
      daytrade_count: raw.daytrade_count,
      pattern_day_trader: raw.pattern_day_trader,
      trading_blocked: raw.trading_blocked,
      status: raw.status,
    })
  }
}

/// Element of `GET /v2/positions`.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionResponse {
  pub symbol: String,
  pub qty: String,
  pub side: PositionSide,
  pub avg_entry_price: String,
  pub current_price: Option<String>,
  pub unrealized_pl: Option<String>,
  pub asset_class: String,
}

impl TryFrom<PositionResponse> for BrokerPosition {
  type Error = BrokerError;

  fn try_from(raw: PositionResponse) -> Result<Self, Self::Error> {
    let avg_entry_price = parse_num("avg_entry_price", &raw.avg_entry_price)?;
    Ok(Self {
      qty: parse_num("qty", &raw.qty)?,
      side: raw.side,
      avg_entry_price,
      current_price: raw
        .current_price
        .as_ref()
        .map_or(Ok(avg_entry_price), |v| parse_num("current_price", v))?,
      unrealized_pl: parse_opt("unrealized_pl", raw.unrealized_pl.as_ref())?,
      asset_class: raw.asset_class,
      symbol: raw.symbol,
    })
  }
}

/// Leg inside an order response.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderLegResponse {
  pub symbol: String,
}

/// Order object returned by the orders endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
  pub id: String,
  pub client_order_id: String,
  /// Empty for multi-leg parents.
  #[serde(default)]
  pub symbol: Option<String>,
  pub status: OrderStatus,
  pub created_at: DateTime<Utc>,
  pub limit_price: Option<String>,
  #[serde(default)]
  pub legs: Option<Vec<OrderLegResponse>>,
}

impl TryFrom<OrderResponse> for OpenOrder {
  type Error = BrokerError;

  fn try_from(raw: OrderResponse) -> Result<Self, Self::Error> {
    let mut symbols: Vec<String> = raw
      .legs
      .unwrap_or_default()
      .into_iter()
      .map(|l| l.symbol)
      .collect();
    if symbols.is_empty() {
      symbols.extend(raw.symbol.filter(|s| !s.is_empty()));
    }
    Ok(Self {
      id: raw.id,
      client_order_id: raw.client_order_id,
      symbols,
      status: raw.status,
      created_at: raw.created_at,
      limit_price: raw
        .limit_price
        .as_ref()
        .map(|v| parse_num("limit_price", v))
        .transpose()?,
    })
  }
}

/// Leg of a multi-leg order request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegRequest {
  pub symbol: String,
  pub ratio_qty: String,
  pub side: OrderSide,
  pub position_intent: PositionIntent,
}

/// `POST /v2/orders` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub symbol: Option<String>,
  pub qty: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub side: Option<OrderSide>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub position_intent: Option<PositionIntent>,
  #[serde(rename = "type")]
  pub order_type: String,
  pub time_in_force: TimeInForce,
  pub limit_price: String,
  pub client_order_id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub order_class: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub legs: Option<Vec<LegRequest>>,
}

impl From<&OptionOrder> for OrderRequest {
  /// Single-leg orders are plain limit orders with a positive price.
  /// Multi-leg orders use `order_class = "mleg"` and a signed limit
  /// (credit negative).
  fn from(order: &OptionOrder) -> Self {
    let common = |limit: f64| Self {
      symbol: None,
      qty: order.qty.to_string(),
      side: None,
      position_intent: None,
      order_type: "limit".to_string(),
      time_in_force: order.time_in_force,
      limit_price: format!("{limit:.2}"),
      client_order_id: order.client_order_id.clone(),
      order_class: None,
      legs: None,
    };

    match order.legs.as_slice() {
      [leg] => Self {
        symbol: Some(leg.symbol.clone()),
        side: Some(leg.side),
        position_intent: Some(leg.intent),
        ..common(order.limit_price)
      },
      legs => Self {
        order_class: Some("mleg".to_string()),
        legs: Some(
          legs
            .iter()
            .map(|leg| LegRequest {
              symbol: leg.symbol.clone(),
              ratio_qty: leg.ratio_qty.to_string(),
              side: leg.side,
              position_intent: leg.intent,
            })
            .collect(),
        ),
        ..common(order.signed_limit())
      },
    }
  }
}

/// Daily bar (data API numerics are JSON numbers).
#[derive(Debug, Clone, Deserialize)]
pub struct Bar {
  /// Close.
  pub c: f64,
  /// Bar start.
  pub t: DateTime<Utc>,
}

/// `GET /v2/stocks/{symbol}/bars`
#[derive(Debug, Clone, Deserialize)]
pub struct BarsResponse {
  /// `null` when the range holds no bars.
  #[serde(default)]
  pub bars: Option<Vec<Bar>>,
  pub next_page_token: Option<String>,
}

/// Trade print.
#[derive(Debug, Clone, Deserialize)]
pub struct LatestTrade {
  /// Price.
  pub p: f64,
}

/// `GET /v2/stocks/{symbol}/trades/latest`
#[derive(Debug, Clone, Deserialize)]
pub struct LatestTradeResponse {
  pub trade: LatestTrade,
}

/// Top of book for an option contract.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotQuote {
  /// Ask price.
  pub ap: f64,
  /// Bid price.
  pub bp: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Greeks {
  pub delta: Option<f64>,
}

/// One contract in an option chain snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionSnapshot {
  pub latest_quote: Option<SnapshotQuote>,
  pub greeks: Option<Greeks>,
  pub implied_volatility: Option<f64>,
}

/// `GET /v1beta1/options/snapshots/{underlying}`
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotsResponse {
  #[serde(default)]
  pub snapshots: HashMap<String, OptionSnapshot>,
  pub next_page_token: Option<String>,
}

impl SnapshotsResponse {
  /// Quotes for contracts with a parseable symbol and a live quote.
  pub fn into_quotes(self) -> Vec<OptionQuote> {
    self
      .snapshots
      .into_iter()
      .filter_map(|(symbol, snap)| {
        let contract = OptionContract::parse_occ(&symbol).ok()?;
        let quote = snap.latest_quote?;
        Some(OptionQuote {
          contract,
          bid: quote.bp,
          ask: quote.ap,
          delta: snap.greeks.and_then(|g| g.delta),
          implied_volatility: snap.implied_volatility,
        })
      })
      .collect()
  }
}
