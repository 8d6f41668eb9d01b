//! Strategy candidates: cash-secured puts and iron condors.
//!
//! Turns a quoted option chain into a concrete `TradeCandidate` (legs,
//! credit, collateral) and then into an `OptionOrder`. All prices come from
//! the quotes handed in; nothing here knows a price of its own.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::trade::{
    round_to_cent, OptionContract, OptionOrder, OptionType, OrderLeg, OrderSide,
    PositionIntent, TimeInForce, CONTRACT_MULTIPLIER,
};

/// Strategy opened on an underlying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Short put fully collateralised by cash.
    CashSecuredPut,
    /// Short put spread + short call spread.
    IronCondor,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CashSecuredPut => write!(f, "csp"),
            Self::IronCondor => write!(f, "iron_condor"),
        }
    }
}

/// Top-of-book quote for one option contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub contract: OptionContract,
    pub bid: f64,
    pub ask: f64,
    /// Delta, when the feed provides greeks.
    pub delta: Option<f64>,
    /// Implied volatility, when the feed provides it.
    pub implied_volatility: Option<f64>,
}

impl OptionQuote {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Bid-ask spread as a fraction of mid; infinite for a dead quote.
    pub fn spread_pct(&self) -> f64 {
        let mid = self.mid();
        if mid <= 0.0 {
            return f64::INFINITY;
        }
        (self.ask - self.bid) / mid
    }
}

/// One leg of a candidate trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateLeg {
    pub quote: OptionQuote,
    pub side: OrderSide,
    pub intent: PositionIntent,
}

impl CandidateLeg {
    fn open(quote: OptionQuote, side: OrderSide) -> Self {
        Self {
            quote,
            side,
            intent: PositionIntent::open(side),
        }
    }

    pub fn symbol(&self) -> String {
        self.quote.contract.occ_symbol()
    }
}

/// A fully specified trade awaiting the gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCandidate {
    pub underlying: String,
    pub kind: StrategyKind,
    /// Underlying price used to pick strikes.
    pub underlying_price: f64,
    pub legs: Vec<CandidateLeg>,
    /// Number of contracts / spreads.
    pub contracts: u32,
}

impl TradeCandidate {
    /// Net credit per share at mid: sold premium minus bought premium.
    pub fn net_credit(&self) -> f64 {
        self.legs
            .iter()
            .map(|leg| match leg.side {
                OrderSide::Sell => leg.quote.mid(),
                OrderSide::Buy => -leg.quote.mid(),
            })
            .sum()
    }

    /// Widest strike distance between a short leg and its protective wing.
    fn widest_wing(&self) -> f64 {
        let width_for = |option_type: OptionType| {
            let short = self
                .legs
                .iter()
                .find(|l| l.side == OrderSide::Sell && l.quote.contract.option_type == option_type);
            let long = self
                .legs
                .iter()
                .find(|l| l.side == OrderSide::Buy && l.quote.contract.option_type == option_type);
            match (short, long) {
                (Some(s), Some(l)) => {
                    (s.quote.contract.strike_f64() - l.quote.contract.strike_f64()).abs()
                }
                _ => 0.0,
            }
        };
        width_for(OptionType::Put).max(width_for(OptionType::Call))
    }

    /// Buying power the broker will hold for this trade.
    pub fn collateral_required(&self) -> f64 {
        let per_contract = match self.kind {
            StrategyKind::CashSecuredPut => self
                .legs
                .iter()
                .filter(|l| l.side == OrderSide::Sell)
                .map(|l| l.quote.contract.strike_f64())
                .sum::<f64>(),
            StrategyKind::IronCondor => (self.widest_wing() - self.net_credit()).max(0.0),
        };
        per_contract * CONTRACT_MULTIPLIER * f64::from(self.contracts)
    }

    /// Worst-case loss at expiry.
    pub fn max_loss(&self) -> f64 {
        match self.kind {
            StrategyKind::CashSecuredPut => {
                let strike_total = self.collateral_required();
                let premium =
                    self.net_credit() * CONTRACT_MULTIPLIER * f64::from(self.contracts);
                (strike_total - premium).max(0.0)
            }
            StrategyKind::IronCondor => self.collateral_required(),
        }
    }

    pub fn expiration(&self) -> Option<NaiveDate> {
        self.legs.first().map(|l| l.quote.contract.expiration)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.legs.iter().map(CandidateLeg::symbol).collect()
    }

    /// Build the opening limit order at mid, rounded to the cent.
    pub fn to_order(&self, client_order_id: impl Into<String>) -> OptionOrder {
        let credit = self.net_credit();
        OptionOrder {
            client_order_id: client_order_id.into(),
            legs: self
                .legs
                .iter()
                .map(|leg| OrderLeg {
                    symbol: leg.symbol(),
                    side: leg.side,
                    intent: leg.intent,
                    ratio_qty: 1,
                })
                .collect(),
            qty: self.contracts,
            limit_price: round_to_cent(credit.abs()),
            is_credit: credit >= 0.0,
            time_in_force: TimeInForce::Day,
        }
    }
}

/// Candidate construction parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyParams {
    /// Short strike distance from spot as a fraction.
    pub otm_pct: f64,
    /// Wing width in strike dollars.
    pub wing_width: f64,
    pub target_dte: i64,
    pub min_dte: i64,
    pub max_dte: i64,
    pub contracts: u32,
}

/// Expiration inside `[min_dte, max_dte]` closest to `target_dte`.
///
/// Ties resolve to the earlier expiration.
pub fn select_expiration(
    chain: &[OptionQuote],
    today: NaiveDate,
    params: &StrategyParams,
) -> Option<NaiveDate> {
    let expirations: BTreeSet<NaiveDate> = chain
        .iter()
        .map(|q| q.contract.expiration)
        .filter(|exp| {
            let dte = (*exp - today).num_days();
            dte >= params.min_dte && dte <= params.max_dte
        })
        .collect();

    // BTreeSet iterates ascending, and min_by_key keeps the first minimum.
    expirations
        .into_iter()
        .min_by_key(|exp| ((*exp - today).num_days() - params.target_dte).abs())
}

fn quotes_for(
    chain: &[OptionQuote],
    expiration: NaiveDate,
    option_type: OptionType,
) -> Vec<&OptionQuote> {
    let mut quotes: Vec<&OptionQuote> = chain
        .iter()
        .filter(|q| q.contract.expiration == expiration && q.contract.option_type == option_type)
        .collect();
    quotes.sort_by(|a, b| a.contract.strike.cmp(&b.contract.strike));
    quotes
}

/// Highest strike at or below `limit`.
fn highest_at_or_below<'a>(quotes: &[&'a OptionQuote], limit: f64) -> Option<&'a OptionQuote> {
    quotes
        .iter()
        .rev()
        .find(|q| q.contract.strike_f64() <= limit + 1e-9)
        .copied()
}

/// Lowest strike at or above `limit`.
fn lowest_at_or_above<'a>(quotes: &[&'a OptionQuote], limit: f64) -> Option<&'a OptionQuote> {
    quotes
        .iter()
        .find(|q| q.contract.strike_f64() >= limit - 1e-9)
        .copied()
}

/// Pick strikes from a quoted chain for the requested strategy.
///
/// Returns `None` when the chain has no expiration in the DTE window or a
/// leg cannot be filled.
pub fn build_candidate(
    kind: StrategyKind,
    underlying: &str,
    underlying_price: f64,
    chain: &[OptionQuote],
    today: NaiveDate,
    params: &StrategyParams,
) -> Option<TradeCandidate> {
    if underlying_price <= 0.0 {
        return None;
    }
    let expiration = select_expiration(chain, today, params)?;
    let puts = quotes_for(chain, expiration, OptionType::Put);

    let short_put = highest_at_or_below(&puts, underlying_price * (1.0 - params.otm_pct))?;

    let legs = match kind {
        StrategyKind::CashSecuredPut => {
            vec![CandidateLeg::open(short_put.clone(), OrderSide::Sell)]
        }
        StrategyKind::IronCondor => {
            let calls = quotes_for(chain, expiration, OptionType::Call);
            let short_put_strike = short_put.contract.strike_f64();
            let long_put = highest_at_or_below(&puts, short_put_strike - params.wing_width)?;
            let short_call =
                lowest_at_or_above(&calls, underlying_price * (1.0 + params.otm_pct))?;
            let long_call = lowest_at_or_above(
                &calls,
                short_call.contract.strike_f64() + params.wing_width,
            )?;
            vec![
                CandidateLeg::open(long_put.clone(), OrderSide::Buy),
                CandidateLeg::open(short_put.clone(), OrderSide::Sell),
                CandidateLeg::open(short_call.clone(), OrderSide::Sell),
                CandidateLeg::open(long_call.clone(), OrderSide::Buy),
            ]
        }
    };

    Some(TradeCandidate {
        underlying: underlying.to_string(),
        kind,
        underlying_price,
        legs,
        contracts: params.contracts,
    })
}
