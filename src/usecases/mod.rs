//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement
//! the bot's scheduled jobs. Each use case is a self-contained
//! business operation returning a serialisable report.
//!
//! Use cases:
//! - `GatePipeline`: Momentum, sentiment, risk and execution gates
//! - `RiskManager`: Daily loss, circuit breaker, collateral and PDT guards
//! - `OrderManager`: Order submission, dry run, stale-order cleanup
//! - `TradeCycle`: Candidate construction through order placement
//! - `PositionManager`: Exit rules for open option legs
//! - `StateSync`: Broker-to-snapshot reconciliation and daily P&L
//! - `Scheduler`: Daemon loop running the jobs during market hours

pub mod gates;
pub mod order_manager;
pub mod position_manager;
pub mod risk_manager;
pub mod scheduler;
pub mod state_sync;
pub mod trade_cycle;
