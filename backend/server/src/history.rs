//! Durable daily visitor history, appended to by the reconciler.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::warn;

use crate::error::AppError;

/// Unique visitors of one completed day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueView {
    pub day: NaiveDate,
    pub views_count: u64,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait VisitorHistory: Send + Sync {
    /// Append `row` unless its day is already recorded; true if appended. Check and append are
    /// one step with respect to other callers.
    async fn append_if_absent(&self, row: UniqueView) -> Result<bool, AppError>;
    /// Rows with `day >= since`, oldest first.
    async fn since(&self, since: NaiveDate) -> Result<Vec<UniqueView>, AppError>;
}

/// One JSON document per line.
pub struct FileHistory {
    path: PathBuf,
    writer: Mutex<()>,
}

impl FileHistory {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(()),
        }
    }

    async fn rows(&self) -> Result<Vec<UniqueView>, AppError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::History(Box::new(e))),
        };

        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(row) => Some(row),
                Err(e) => {
                    warn!("Skipping malformed history line in {}: {e}", self.path.display());
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl VisitorHistory for FileHistory {
    async fn append_if_absent(&self, row: UniqueView) -> Result<bool, AppError> {
        let mut line = serde_json::to_string(&row)?;
        line.push('\n');

        let _guard = self.writer.lock().await;

        if self.rows().await?.iter().any(|existing| existing.day == row.day) {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::History(Box::new(e)))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AppError::History(Box::new(e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AppError::History(Box::new(e)))?;
        file.sync_data()
            .await
            .map_err(|e| AppError::History(Box::new(e)))?;

        Ok(true)
    }

    async fn since(&self, since: NaiveDate) -> Result<Vec<UniqueView>, AppError> {
        let mut rows: Vec<UniqueView> = self
            .rows()
            .await?
            .into_iter()
            .filter(|row| row.day >= since)
            .collect();
        rows.sort_by_key(|row| row.day);

        Ok(rows)
    }
}

#[cfg(test)]
pub mod testing {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MemoryHistory {
        pub rows: Mutex<Vec<UniqueView>>,
    }

    #[async_trait]
    impl VisitorHistory for MemoryHistory {
        async fn append_if_absent(&self, row: UniqueView) -> Result<bool, AppError> {
            let mut rows = self.rows.lock();
            if rows.iter().any(|existing| existing.day == row.day) {
                return Ok(false);
            }

            rows.push(row);
            Ok(true)
        }

        async fn since(&self, since: NaiveDate) -> Result<Vec<UniqueView>, AppError> {
            let mut rows: Vec<UniqueView> = self
                .rows
                .lock()
                .iter()
                .filter(|row| row.day >= since)
                .cloned()
                .collect();
            rows.sort_by_key(|row| row.day);
            Ok(rows)
        }
    }
}
