//! Core trading domain types.
//!
//! Defines option contracts (with OCC/OSI symbol encoding), order legs,
//! multi-leg option orders and order lifecycle status. These types are the
//! foundation of the hexagonal architecture's inner ring.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lightweight order identifier used at the ports boundary.
pub type OrderId = String;

/// Contract multiplier for US equity options.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    fn occ_char(self) -> char {
        match self {
            Self::Call => 'C',
            Self::Put => 'P',
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Put => write!(f, "put"),
        }
    }
}

/// Errors from parsing an OCC option symbol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OccParseError {
    #[error("OCC symbol too short: {0:?}")]
    TooShort(String),
    #[error("OCC symbol has no underlying root: {0:?}")]
    MissingRoot(String),
    #[error("OCC symbol has invalid expiration: {0:?}")]
    BadDate(String),
    #[error("OCC symbol has invalid option type: {0:?}")]
    BadType(String),
    #[error("OCC symbol has invalid strike: {0:?}")]
    BadStrike(String),
}

/// A listed equity option contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionContract {
    /// Underlying ticker (OCC root).
    pub underlying: String,
    /// Expiration date.
    pub expiration: NaiveDate,
    /// Strike price in dollars.
    pub strike: Decimal,
    /// Call or put.
    pub option_type: OptionType,
}

impl OptionContract {
    pub fn new(
        underlying: impl Into<String>,
        expiration: NaiveDate,
        strike: Decimal,
        option_type: OptionType,
    ) -> Self {
        Self {
            underlying: underlying.into(),
            expiration,
            strike,
            option_type,
        }
    }

    /// OCC/OSI symbol without root padding, e.g. `SPY250117P00450000`.
    pub fn occ_symbol(&self) -> String {
        let strike_milli = (self.strike * Decimal::from(1000))
            .round()
            .to_u64()
            .unwrap_or(0);
        format!(
            "{}{:02}{:02}{:02}{}{:08}",
            self.underlying,
            self.expiration.year() % 100,
            self.expiration.month(),
            self.expiration.day(),
            self.option_type.occ_char(),
            strike_milli
        )
    }

    /// Parse an OCC/OSI symbol (root may be space-padded).
    pub fn parse_occ(symbol: &str) -> Result<Self, OccParseError> {
        let compact: String = symbol.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.len() < 16 || !compact.is_ascii() {
            return Err(OccParseError::TooShort(symbol.to_string()));
        }

        let split = compact.len() - 15;
        let (root, tail) = compact.split_at(split);
        if root.is_empty() || !root.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(OccParseError::MissingRoot(symbol.to_string()));
        }

        let (date_part, rest) = tail.split_at(6);
        let (type_part, strike_part) = rest.split_at(1);

        let expiration = NaiveDate::parse_from_str(&format!("20{date_part}"), "%Y%m%d")
            .map_err(|_| OccParseError::BadDate(symbol.to_string()))?;

        let option_type = match type_part {
            "C" => OptionType::Call,
            "P" => OptionType::Put,
            _ => return Err(OccParseError::BadType(symbol.to_string())),
        };

        if !strike_part.chars().all(|c| c.is_ascii_digit()) {
            return Err(OccParseError::BadStrike(symbol.to_string()));
        }
        let strike_milli = u64::from_str(strike_part)
            .map_err(|_| OccParseError::BadStrike(symbol.to_string()))?;
        let strike = Decimal::from(strike_milli) / Decimal::from(1000);

        Ok(Self {
            underlying: root.to_string(),
            expiration,
            strike: strike.normalize(),
            option_type,
        })
    }

    /// Calendar days from `today` to expiration (negative once expired).
    pub fn days_to_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiration - today).num_days()
    }

    /// Strike as `f64` for price arithmetic.
    pub fn strike_f64(&self) -> f64 {
        self.strike.to_f64().unwrap_or(0.0)
    }
}

impl fmt::Display for OptionContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.occ_symbol())
    }
}

/// Trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Opening/closing intent carried by each option leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionIntent {
    BuyToOpen,
    SellToOpen,
    BuyToClose,
    SellToClose,
}

impl PositionIntent {
    /// Opening intent for a side.
    pub fn open(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Self::BuyToOpen,
            OrderSide::Sell => Self::SellToOpen,
        }
    }

    /// Closing intent for a side.
    pub fn close(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Self::BuyToClose,
            OrderSide::Sell => Self::SellToClose,
        }
    }

    pub fn is_opening(self) -> bool {
        matches!(self, Self::BuyToOpen | Self::SellToOpen)
    }
}

/// One leg of an option order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLeg {
    /// OCC symbol.
    pub symbol: String,
    pub side: OrderSide,
    pub intent: PositionIntent,
    /// Ratio relative to the order quantity.
    pub ratio_qty: u32,
}

/// Time in force. Options only support day orders on the paper account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
}

/// A limit order for one or more option legs.
///
/// `limit_price` is a positive per-share amount. `is_credit` records
/// whether that amount is received (credit) or paid (debit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionOrder {
    /// Client-assigned idempotency key.
    pub client_order_id: String,
    pub legs: Vec<OrderLeg>,
    /// Number of spreads / contracts.
    pub qty: u32,
    /// Per-share limit (always positive).
    pub limit_price: f64,
    /// True when the order collects premium.
    pub is_credit: bool,
    pub time_in_force: TimeInForce,
}

impl OptionOrder {
    pub fn is_multi_leg(&self) -> bool {
        self.legs.len() > 1
    }

    /// Limit price as sent for multi-leg orders: credit is negative.
    pub fn signed_limit(&self) -> f64 {
        if self.is_credit {
            -self.limit_price
        } else {
            self.limit_price
        }
    }

    pub fn is_opening(&self) -> bool {
        self.legs.iter().all(|l| l.intent.is_opening())
    }
}

/// Lifecycle status of a brokerage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Accepted,
    PendingNew,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
    #[serde(other)]
    Other,
}

impl OrderStatus {
    /// Whether the order still holds buying power.
    pub fn is_working(self) -> bool {
        matches!(
            self,
            Self::New | Self::Accepted | Self::PendingNew | Self::PartiallyFilled
        )
    }
}

/// Why an open leg is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    ProfitTarget,
    StopLoss,
    Expiry,
    OrphanedLong,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProfitTarget => "profit_target",
            Self::StopLoss => "stop_loss",
            Self::Expiry => "expiry",
            Self::OrphanedLong => "orphaned_long",
        })
    }
}

/// Bot operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    /// Paper account
    Paper,
    /// Real money account
    Live,
}

/// Round a per-share price to the cent.
pub fn round_to_cent(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}
