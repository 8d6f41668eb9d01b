//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the domain/usecases layer
//! requires from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `Brokerage`: Account, positions, orders and option quotes
//! - `TradeAdvisor`: LLM sentiment and trade rationale
//! - `LessonStore`: Lessons-learned retrieval
//! - `Repository`: State persistence (JSONL-based)

pub mod advisor;
pub mod brokerage;
pub mod lessons;
pub mod repository;
