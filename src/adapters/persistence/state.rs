//! State Store - The Shared `state.json` Snapshot
//!
//! Sync, manage and trade each read the previous snapshot and write a
//! new one. Writes go through a sibling `.tmp` file that is flushed to
//! disk before it replaces `state.json`, so a reader only ever sees a
//! complete snapshot.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::ports::repository::BotStateSnapshot;

const STATE_FILE: &str = "state.json";

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open the store, creating the data directory when missing.
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn staging_path(&self) -> PathBuf {
        self.dir.join(format!("{STATE_FILE}.tmp"))
    }

    #[instrument(skip(self, state), fields(trading_date = %state.trading_date))]
    pub async fn save(&self, state: &BotStateSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state).context("Failed to serialize state")?;
        let staging = self.staging_path();

        let mut file = fs::File::create(&staging)
            .await
            .context("Failed to create staging state file")?;
        file.write_all(&bytes)
            .await
            .context("Failed to write staging state file")?;
        file.sync_all()
            .await
            .context("Failed to flush staging state file")?;
        drop(file);

        fs::rename(&staging, self.path())
            .await
            .context("Failed to replace state file")?;

        debug!(
            positions = state.position_symbols.len(),
            pending_closes = state.pending_closes.len(),
            daily_loss = state.risk.daily_loss,
            "State saved"
        );
        Ok(())
    }

    /// `None` before the first save.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Option<BotStateSnapshot>> {
        let path = self.path();
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No saved state yet");
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let state: BotStateSnapshot = serde_json::from_slice(&raw)
            .with_context(|| format!("{} is not a valid state snapshot", path.display()))?;

        info!(
            trading_date = %state.trading_date,
            saved_at = %state.timestamp,
            pending_closes = state.pending_closes.len(),
            "State loaded"
        );
        Ok(Some(state))
    }

    /// The data directory exists and any saved snapshot is readable.
    pub async fn is_healthy(&self) -> bool {
        let dir_ok = fs::metadata(&self.dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !dir_ok {
            return false;
        }
        match fs::metadata(self.path()).await {
            Ok(meta) => meta.is_file(),
            Err(e) => e.kind() == std::io::ErrorKind::NotFound,
        }
    }
}
