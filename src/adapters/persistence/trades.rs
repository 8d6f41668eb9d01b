//! Trade Logger - Append-only JSONL Journals
//!
//! Persists trade records and gate decisions to daily JSONL files
//! (`trades/YYYY-MM-DD.jsonl`, `decisions/YYYY-MM-DD.jsonl`) and daily
//! P&L to `pnl/daily_pnl.jsonl`. Each line is a self-contained JSON
//! record for easy parsing, streaming, and crash recovery.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{info, instrument};

use super::jsonl::{append_record, read_dir_records, read_records};
use crate::ports::repository::{DailyPnl, DecisionRecord, TradeRecord};

/// Append-only JSONL trade logger with daily file rotation.
///
/// Files are partitioned by the UTC date of the record's timestamp:
/// - Append-only writes (no read-modify-write)
/// - Line-by-line streaming for analysis
/// - Natural daily partitioning
pub struct TradeLogger {
    /// Base directory for trade files.
    trades_dir: PathBuf,
    /// Base directory for gate decision files.
    decisions_dir: PathBuf,
    /// Directory for PnL summaries.
    pnl_dir: PathBuf,
}

fn daily_file(dir: &Path, timestamp: DateTime<Utc>) -> PathBuf {
    dir.join(format!("{}.jsonl", timestamp.format("%Y-%m-%d")))
}

impl TradeLogger {
    /// Create a new trade logger in the given data directory.
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let trades_dir = data_dir.join("trades");
        let decisions_dir = data_dir.join("decisions");
        let pnl_dir = data_dir.join("pnl");

        for dir in [&trades_dir, &decisions_dir, &pnl_dir] {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        Ok(Self {
            trades_dir,
            decisions_dir,
            pnl_dir,
        })
    }

    /// Append a trade record to its day's JSONL file.
    #[instrument(skip(self, record), fields(trade_id = %record.id))]
    pub async fn append_trade(&self, record: &TradeRecord) -> Result<()> {
        let path = daily_file(&self.trades_dir, record.timestamp);
        append_record(&path, record)
            .await
            .context("Failed to append trade record")
    }

    /// Load all trade records from all daily files, oldest first.
    #[instrument(skip(self))]
    pub async fn load_all_trades(&self) -> Result<Vec<TradeRecord>> {
        let mut trades: Vec<TradeRecord> = read_dir_records(&self.trades_dir).await?;
        trades.sort_by_key(|t| t.timestamp);
        info!(count = trades.len(), "Loaded trade records");
        Ok(trades)
    }

    /// Append a gate decision to its day's JSONL file.
    #[instrument(skip(self, record), fields(underlying = %record.underlying, approved = record.approved))]
    pub async fn append_decision(&self, record: &DecisionRecord) -> Result<()> {
        let path = daily_file(&self.decisions_dir, record.timestamp);
        append_record(&path, record)
            .await
            .context("Failed to append decision record")
    }

    /// Load all decision records, oldest first.
    pub async fn load_all_decisions(&self) -> Result<Vec<DecisionRecord>> {
        let mut decisions: Vec<DecisionRecord> = read_dir_records(&self.decisions_dir).await?;
        decisions.sort_by_key(|d| d.timestamp);
        Ok(decisions)
    }

    /// Save a daily PnL summary.
    #[instrument(skip(self, pnl), fields(date = %pnl.date))]
    pub async fn save_daily_pnl(&self, pnl: &DailyPnl) -> Result<()> {
        append_record(&self.pnl_dir.join("daily_pnl.jsonl"), pnl)
            .await
            .context("Failed to append daily PnL")
    }

    /// Load all daily PnL records.
    pub async fn load_daily_pnl(&self) -> Result<Vec<DailyPnl>> {
        read_records(&self.pnl_dir.join("daily_pnl.jsonl")).await
    }

    /// Check if the trades directory is writable.
    pub async fn is_healthy(&self) -> bool {
        let test_path = self.trades_dir.join(".health_check");
        let result = fs::write(&test_path, b"ok").await;
        let _ = fs::remove_file(&test_path).await;
        result.is_ok()
    }
}
