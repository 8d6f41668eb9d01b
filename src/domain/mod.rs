//! Domain layer - Core business logic and models.
//!
//! This module contains the pure domain logic for the options gate bot.
//! No I/O here (hexagonal architecture inner ring).
//! All types are serializable and testable in isolation.

pub mod indicators;
pub mod lesson;
pub mod market_hours;
pub mod risk;
pub mod strategy;
pub mod trade;

// Re-export core types for convenience
pub use lesson::{Lesson, Severity};
pub use market_hours::MarketCalendar;
pub use risk::RiskState;
pub use strategy::{OptionQuote, StrategyKind, StrategyParams, TradeCandidate};
pub use trade::{
    BotMode, OptionContract, OptionOrder, OptionType, OrderId, OrderLeg, OrderSide,
    OrderStatus, PositionIntent, TimeInForce,
};
