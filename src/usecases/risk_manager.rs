//! Risk Manager - Daily Loss, Circuit Breaker and Account Guards
//!
//! Enforces risk controls:
//! - Maximum daily loss (fraction of starting equity)
//! - Circuit breaker on consecutive losses
//! - Cooldown period after circuit breaker trigger
//! - Collateral cap against options buying power
//! - Pattern-day-trader guard for small accounts
//!
//! Counters live in a serialisable `RiskState` so separate job
//! invocations continue from the last snapshot.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{GateConfig, RiskConfig};
pub use crate::domain::risk::RiskState;
use crate::ports::brokerage::AccountSnapshot;

/// Risk manager shared by the jobs of one process.
pub type SharedRiskManager = Arc<Mutex<RiskManager>>;

/// Risk manager enforcing trading limits and circuit breakers.
#[derive(Debug, Clone)]
pub struct RiskManager {
  /// Maximum daily loss as fraction of starting equity.
  max_daily_loss_fraction: f64,
  /// Maximum collateral as a fraction of options buying power.
  max_position_pct: f64,
  /// Circuit breaker threshold (consecutive losses).
  circuit_breaker_losses: u32,
  /// Cooldown period (seconds).
  cooldown_seconds: u64,
  /// Equity below which the PDT rule applies.
  pdt_equity_threshold: f64,
  /// Day trades allowed before blocking.
  max_day_trades: u32,
  /// Persisted counters.
  state: RiskState,
}

impl RiskManager {
  /// Create a new risk manager from config.
  pub fn new(risk: &RiskConfig, gates: &GateConfig) -> Self {
    Self::restore(risk, gates, RiskState::default())
  }

  /// Continue from persisted counters.
  pub fn restore(risk: &RiskConfig, gates: &GateConfig, state: RiskState) -> Self {
    Self {
      max_daily_loss_fraction: risk.max_daily_loss_fraction,
      max_position_pct: gates.max_position_pct,
      circuit_breaker_losses: risk.circuit_breaker_losses,
      cooldown_seconds: risk.cooldown_seconds,
      pdt_equity_threshold: risk.pdt_equity_threshold,
      max_day_trades: risk.max_day_trades,
      state,
    }
  }

  /// Wrap for sharing between jobs.
  pub fn shared(self) -> SharedRiskManager {
    Arc::new(Mutex::new(self))
  }

  /// Counters to persist.
  pub fn state(&self) -> &RiskState {
    &self.state
  }

  /// Check if trading is currently allowed.
  ///
  /// False while the circuit breaker holds or once the daily loss
  /// limit is hit against the day's starting equity.
  pub fn can_trade(&self, now: DateTime<Utc>) -> bool {
    if self.is_circuit_breaker_active(now) {
      return false;
    }
    match self.state.starting_equity {
      Some(equity) => !self.daily_loss_limit_hit(equity),
      None => true,
    }
  }

  /// Record a closed trade's realised P/L.
  pub fn record_trade(&mut self, pnl: f64, now: DateTime<Utc>) {
    if pnl < 0.0 {
      self.state.daily_loss += pnl.abs();
      self.state.consecutive_losses += 1;

      if self.state.consecutive_losses >= self.circuit_breaker_losses {
        self.trigger_circuit_breaker(now);
      }
    } else {
      self.state.consecutive_losses = 0;
    }
  }

  /// Reset daily counters when the Eastern trading date changes.
  ///
  /// Returns true when a new day started. The circuit breaker is not
  /// cleared here; it expires on its own cooldown.
  pub fn roll_day(&mut self, date: NaiveDate, equity: f64) -> bool {
    if self.state.trading_date == Some(date) {
      if self.state.starting_equity.is_none() {
        self.state.starting_equity = Some(equity);
      }
      return false;
    }
    info!(
      previous = ?self.state.trading_date,
      date = %date,
      daily_loss = self.state.daily_loss,
      "Resetting daily risk counters"
    );
    self.state.trading_date = Some(date);
    self.state.daily_loss = 0.0;
    self.state.starting_equity = Some(equity);
    true
  }

  /// Whether today's realised loss reached the limit.
  pub fn daily_loss_limit_hit(&self, equity: f64) -> bool {
    let max_loss = equity * self.max_daily_loss_fraction;
    if self.state.daily_loss >= max_loss {
      warn!(
        daily_loss = self.state.daily_loss,
        max = max_loss,
        "Daily loss limit reached"
      );
      return true;
    }
    false
  }

  /// Whether a trade needing `collateral` fits the buying power caps.
  pub fn collateral_allowed(&self, collateral: f64, options_buying_power: f64) -> bool {
    collateral > 0.0
      && collateral <= options_buying_power
      && collateral <= options_buying_power * self.max_position_pct
  }

  /// Whether the PDT rule blocks another round trip today.
  pub fn pdt_blocked(&self, account: &AccountSnapshot) -> bool {
    account.equity < self.pdt_equity_threshold && account.daytrade_count >= self.max_day_trades
  }

  /// Get current daily loss.
  pub fn daily_loss(&self) -> f64 {
    self.state.daily_loss
  }

  /// Check if circuit breaker is active.
  pub fn is_circuit_breaker_active(&self, now: DateTime<Utc>) -> bool {
    self.state.breaker_active(now)
  }

  /// Trigger the circuit breaker.
  fn trigger_circuit_breaker(&mut self, now: DateTime<Utc>) {
    let cooldown = Duration::seconds(i64::try_from(self.cooldown_seconds).unwrap_or(i64::MAX / 1000));
    self.state.circuit_breaker_until = Some(now + cooldown);
    self.state.consecutive_losses = 0;

    warn!(
      losses = self.circuit_breaker_losses,
      cooldown_seconds = self.cooldown_seconds,
      until = ?self.state.circuit_breaker_until,
      "Circuit breaker triggered"
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::loader::tests::sample_config;
  use chrono::TimeZone;

  fn manager() -> RiskManager {
    let mut config = sample_config();
    config.risk.circuit_breaker_losses = 3;
    config.risk.cooldown_seconds = 300;
    RiskManager::new(&config.risk, &config.gates)
  }

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
  }

  fn account(equity: f64, daytrades: u32) -> AccountSnapshot {
    AccountSnapshot {
      equity,
      last_equity: equity,
      buying_power: equity,
      options_buying_power: equity,
      cash: equity,
      daytrade_count: daytrades,
      pattern_day_trader: false,
      trading_blocked: false,
      status: "ACTIVE".to_string(),
    }
  }

  #[test]
  fn test_can_trade_initially() {
    let rm = manager();
    assert!(rm.can_trade(now()));
  }

  #[test]
  fn test_circuit_breaker_triggers_and_expires() {
    let mut rm = manager();
    rm.record_trade(-10.0, now());
    rm.record_trade(-10.0, now());
    rm.record_trade(-10.0, now());
    assert!(rm.is_circuit_breaker_active(now()));
    assert!(!rm.can_trade(now() + Duration::seconds(299)));
    assert!(rm.can_trade(now() + Duration::seconds(300)));
  }

  #[test]
  fn test_winning_trade_resets_counter() {
    let mut rm = manager();
    rm.record_trade(-10.0, now());
    rm.record_trade(-10.0, now());
    rm.record_trade(5.0, now()); // Win resets counter
    rm.record_trade(-10.0, now());
    assert!(!rm.is_circuit_breaker_active(now()));
  }

  #[test]
  fn test_daily_loss_limit_blocks_until_next_day() {
    let mut rm = manager();
    let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    assert!(rm.roll_day(day, 10_000.0));
    // 2% of 10k = 200
    rm.record_trade(-150.0, now());
    assert!(rm.can_trade(now()));
    rm.record_trade(60.0, now());
    rm.record_trade(-60.0, now());
    assert!(!rm.can_trade(now()));

    assert!(!rm.roll_day(day, 9_800.0));
    assert!(!rm.can_trade(now()));
    assert!(rm.roll_day(day.succ_opt().unwrap(), 9_800.0));
    assert!(rm.can_trade(now()));
  }

  #[test]
  fn test_restore_keeps_counters() {
    let config = sample_config();
    let state = RiskState {
      circuit_breaker_until: Some(now() + Duration::hours(1)),
      ..RiskState::default()
    };
    let rm = RiskManager::restore(&config.risk, &config.gates, state);
    assert!(!rm.can_trade(now()));
  }

  #[test]
  fn test_collateral_caps() {
    let rm = manager(); // max_position_pct 0.2
    assert!(rm.collateral_allowed(1_000.0, 10_000.0));
    assert!(!rm.collateral_allowed(2_500.0, 10_000.0));
    assert!(!rm.collateral_allowed(0.0, 10_000.0));
  }

  #[test]
  fn test_pdt_guard() {
    let rm = manager();
    assert!(rm.pdt_blocked(&account(20_000.0, 3)));
    assert!(!rm.pdt_blocked(&account(20_000.0, 2)));
    assert!(!rm.pdt_blocked(&account(30_000.0, 5)));
  }
}
