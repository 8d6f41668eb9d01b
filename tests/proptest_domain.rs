//! Property-Based Tests - Domain Layer Invariants
//!
//! Uses `proptest` to verify that domain components maintain
//! their invariants across random inputs.

use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use proptest::prelude::*;
use rust_decimal::Decimal;

use options_gate_bot::domain::indicators::{rsi, sma};
use options_gate_bot::domain::lesson::tokenize;
use options_gate_bot::domain::market_hours::MarketCalendar;
use options_gate_bot::domain::strategy::{OptionQuote, StrategyKind, StrategyParams, build_candidate};
use options_gate_bot::domain::trade::{OptionContract, OptionType};

// ── Indicator Properties ────────────────────────────────────

proptest! {
    /// RSI is always inside [0, 100] when defined.
    #[test]
    fn rsi_always_in_range(
        closes in prop::collection::vec(1.0f64..1000.0, 15..120),
        period in 2usize..30,
    ) {
        if let Some(value) = rsi(&closes, period) {
            prop_assert!((0.0..=100.0).contains(&value), "RSI out of range: {value}");
        } else {
            prop_assert!(closes.len() < period + 1);
        }
    }

    /// Thin history never produces a reading.
    #[test]
    fn rsi_none_on_short_history(
        closes in prop::collection::vec(1.0f64..1000.0, 0..15),
    ) {
        prop_assert_eq!(rsi(&closes, 14), None);
    }

    /// Strictly rising closes read 100.
    #[test]
    fn rsi_saturates_on_monotonic_rise(start in 10.0f64..500.0, step in 0.01f64..5.0) {
        let closes: Vec<f64> = (0..30).map(|i| start + step * f64::from(i)).collect();
        prop_assert_eq!(rsi(&closes, 14), Some(100.0));
    }

    /// SMA lies between the window's min and max.
    #[test]
    fn sma_within_window_bounds(
        closes in prop::collection::vec(1.0f64..1000.0, 20..60),
    ) {
        let value = sma(&closes, 20).unwrap();
        let window = &closes[closes.len() - 20..];
        let lo = window.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(value >= lo - 1e-9 && value <= hi + 1e-9);
    }
}

// ── OCC Symbol Properties ───────────────────────────────────

fn underlying_strategy() -> impl Strategy<Value = String> {
    "[A-Z]{1,5}"
}

proptest! {
    /// Encoding then parsing an OCC symbol gives back the contract.
    #[test]
    fn occ_symbol_round_trips(
        underlying in underlying_strategy(),
        days in 0i64..3000,
        strike_milli in 500u64..9_999_000,
        is_put in any::<bool>(),
    ) {
        let expiration = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(days);
        let strike = Decimal::from(strike_milli) / Decimal::from(1000);
        let option_type = if is_put { OptionType::Put } else { OptionType::Call };
        let contract = OptionContract::new(underlying, expiration, strike, option_type);

        let symbol = contract.occ_symbol();
        prop_assert_eq!(symbol.len(), contract.underlying.len() + 15);

        let parsed = OptionContract::parse_occ(&symbol).unwrap();
        prop_assert_eq!(parsed.underlying, contract.underlying);
        prop_assert_eq!(parsed.expiration, expiration);
        prop_assert_eq!(parsed.option_type, option_type);
        prop_assert_eq!(parsed.strike.normalize(), strike.normalize());
    }

    /// Garbage never parses into a contract.
    #[test]
    fn occ_parse_rejects_short_input(s in "[A-Z0-9]{0,15}") {
        prop_assert!(OptionContract::parse_occ(&s).is_err());
    }
}

// ── Calendar Properties ─────────────────────────────────────

proptest! {
    /// Weekends are never open.
    #[test]
    fn weekends_are_closed(offset_minutes in 0i64..(60 * 24 * 365 * 3)) {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(offset_minutes);
        let calendar = MarketCalendar::default();
        let date = calendar.eastern_date(ts);
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            prop_assert!(!calendar.is_open(ts));
            prop_assert_eq!(calendar.minutes_until_close(ts), None);
        }
    }

    /// The next open is strictly later, on a trading day, and open.
    #[test]
    fn next_open_is_a_future_session(offset_minutes in 0i64..(60 * 24 * 365)) {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(offset_minutes);
        let calendar = MarketCalendar::default();
        let next = calendar.next_open(now).unwrap();
        prop_assert!(next > now);
        prop_assert!(calendar.is_open(next));
        prop_assert!(calendar.is_trading_day(calendar.eastern_date(next)));
    }
}

// ── Candidate Properties ────────────────────────────────────

fn chain_around(spot: f64, exp: NaiveDate) -> Vec<OptionQuote> {
    let center = (spot / 5.0).round() as i64 * 5;
    let mut chain = Vec::new();
    for k in -10..=10 {
        let strike = center + k * 5;
        if strike <= 0 {
            continue;
        }
        for option_type in [OptionType::Put, OptionType::Call] {
            let distance = (strike as f64 - spot).abs();
            let mid = (spot * 0.03 - distance * 0.1).max(0.05);
            chain.push(OptionQuote {
                contract: OptionContract::new("XYZ", exp, Decimal::from(strike), option_type),
                bid: mid * 0.95,
                ask: mid * 1.05,
                delta: None,
                implied_volatility: None,
            });
        }
    }
    chain
}

proptest! {
    /// Iron condor strikes are ordered long put < short put < spot < short call < long call,
    /// and a CSP's short put sits at or below the OTM target.
    #[test]
    fn candidates_respect_strike_ordering(spot in 50.0f64..500.0, otm_pct in 0.02f64..0.10) {
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let exp = today + Duration::days(30);
        let chain = chain_around(spot, exp);
        let params = StrategyParams {
            otm_pct,
            wing_width: 5.0,
            target_dte: 30,
            min_dte: 21,
            max_dte: 45,
            contracts: 1,
        };

        if let Some(csp) = build_candidate(StrategyKind::CashSecuredPut, "XYZ", spot, &chain, today, &params) {
            prop_assert_eq!(csp.legs.len(), 1);
            prop_assert!(csp.legs[0].quote.contract.strike_f64() <= spot * (1.0 - otm_pct) + 1e-9);
            prop_assert!(csp.collateral_required() > 0.0);
        }

        if let Some(ic) = build_candidate(StrategyKind::IronCondor, "XYZ", spot, &chain, today, &params) {
            let strikes: Vec<f64> = ic.legs.iter().map(|l| l.quote.contract.strike_f64()).collect();
            prop_assert_eq!(strikes.len(), 4);
            prop_assert!(strikes[0] < strikes[1]);
            prop_assert!(strikes[1] < spot && spot < strikes[2]);
            prop_assert!(strikes[2] < strikes[3]);
            prop_assert!(ic.max_loss() >= 0.0);
        }
    }

    /// Lesson tokens are lowercase and never shorter than three characters.
    #[test]
    fn tokenize_normalises_terms(text in "[A-Za-z0-9 ,.!?-]{0,80}") {
        for term in tokenize(&text) {
            prop_assert!(term.len() >= 3);
            prop_assert_eq!(term.clone(), term.to_lowercase());
        }
    }
}
