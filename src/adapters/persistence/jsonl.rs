//! JSONL helpers shared by the trade journal and the lesson store.
//!
//! One self-contained JSON object per line. Appends are a single
//! `write_all` on an append-mode handle; reads skip malformed lines with
//! a warning so one torn write cannot hide the rest of the file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Append one record as a JSON line.
pub async fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut json = serde_json::to_string(record).context("Failed to serialize record")?;
    json.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;

    file.write_all(json.as_bytes())
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    file.flush().await.context("Failed to flush JSONL file")?;

    Ok(())
}

/// Read every well-formed record; a missing file is empty.
pub async fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(
                    file = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping malformed JSONL record"
                );
            }
        }
    }

    Ok(records)
}

/// Read records from every `*.jsonl` file in `dir`.
pub async fn read_dir_records<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut records = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        records.extend(read_records::<T>(&path).await?);
    }
    Ok(records)
}
