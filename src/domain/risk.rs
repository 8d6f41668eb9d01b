//! Persisted risk counters.
//!
//! Kept in the state snapshot so separate cron invocations (trade, manage,
//! sync) see the same daily loss and circuit breaker.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Risk counters for one Eastern trading date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    /// Eastern date these counters belong to.
    pub trading_date: Option<NaiveDate>,
    /// Realised loss so far today (positive dollars).
    pub daily_loss: f64,
    /// Losing closes in a row.
    pub consecutive_losses: u32,
    /// Circuit breaker holds until this instant.
    pub circuit_breaker_until: Option<DateTime<Utc>>,
    /// Equity at the first sync of the day.
    pub starting_equity: Option<f64>,
}

impl RiskState {
    pub fn breaker_active(&self, now: DateTime<Utc>) -> bool {
        self.circuit_breaker_until.is_some_and(|until| now < until)
    }
}
