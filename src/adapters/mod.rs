//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP clients, file I/O, HTTP servers). Each
//! sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `alpaca`: Alpaca trading and market data REST client
//! - `cli`: Command-line entry points and service wiring
//! - `lessons`: JSONL lessons-learned store with ranked retrieval
//! - `llm`: Claude sentiment and rationale advisor
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: JSONL trade journal and state snapshots

pub mod alpaca;
pub mod cli;
pub mod lessons;
pub mod llm;
pub mod metrics;
pub mod persistence;
