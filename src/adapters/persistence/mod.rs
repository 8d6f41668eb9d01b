//! Persistence Adapters - JSONL-based File Storage
//!
//! Implements the Repository port using append-only JSONL files
//! for trade, decision and P&L logs and atomic JSON snapshots for
//! bot state. Everything lives under `persistence.data_dir`.

pub mod jsonl;
pub mod repository_impl;
pub mod state;
pub mod trades;

pub use repository_impl::RepositoryImpl;
pub use state::StateStore;
pub use trades::TradeLogger;
