//! Appends predictions to a JSON-lines file

use crate::core::batch::Batch;
use crate::core::component::{Configurable, Output, Pingable};
use crate::core::config::Configuration;
use crate::core::error::{Result, ServiceError};
use crate::core::ArgSpec;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Output writing one JSON object per prediction row
///
/// Each line is `{"dataset": ..., "emitted_at": ..., "record": {...}}`.
pub struct FileOutput {
    path: PathBuf,
}

impl FileOutput {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ServiceError::connectivity(self.path.display().to_string(), e))
    }
}

impl Configurable for FileOutput {
    fn args(key: &str) -> Vec<ArgSpec> {
        vec![ArgSpec::scoped(key, "path").help("File to append predictions to")]
    }

    fn from_config(config: &Configuration, key: &str) -> Result<Self> {
        let path_key = format!("{}.path", key);
        let path = config
            .get_str(&path_key)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ServiceError::missing(&path_key))?;
        Ok(Self::new(path))
    }
}

#[async_trait]
impl Pingable for FileOutput {
    /// The file must be openable for append
    async fn ping(&self) -> Result<()> {
        let mut file = self.open().await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Output for FileOutput {
    type Batch = Batch;
    type Predictions = Batch;

    async fn emit(&self, _batch: &Batch, predictions: &Batch) -> Result<()> {
        let emitted_at = Utc::now().to_rfc3339();
        let mut buffer = String::new();
        let mut lines = 0;
        for dataset in predictions.datasets() {
            for row in &dataset.rows {
                let line = json!({
                    "dataset": dataset.name,
                    "emitted_at": emitted_at,
                    "record": row,
                });
                buffer.push_str(&line.to_string());
                buffer.push('\n');
                lines += 1;
            }
        }

        let mut file = self.open().await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;

        info!("Appended {} predictions to {}", lines, self.path.display());
        Ok(())
    }
}
