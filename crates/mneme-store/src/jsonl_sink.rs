//! Append-only JSON Lines sink.
//!
//! Each harvested item is written as its raw service payload on a single
//! line. The file is opened in append mode, so earlier runs' output is
//! never truncated.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mneme_core::error::AppError;
use mneme_core::traits::ItemSink;
use mneme_core::Item;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// JSON Lines file sink.
///
/// Clones share the same file handle. Each `append` call writes all of
/// its lines under one lock and flushes before releasing it, so batches
/// from concurrent harvests never interleave.
#[derive(Clone)]
pub struct JsonlSink {
    path: PathBuf,
    file: Arc<Mutex<File>>,
    written: Arc<AtomicU64>,
}

impl JsonlSink {
    /// Opens `path` for appending, creating it and its parent directory
    /// when missing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| sink_error(&path, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| sink_error(&path, e))?;

        tracing::debug!(path = %path.display(), "Opened output file");

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
            written: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of items written through this sink (and its clones).
    pub fn items_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

impl ItemSink for JsonlSink {
    async fn append(&self, items: &[Item]) -> Result<(), AppError> {
        if items.is_empty() {
            return Ok(());
        }

        // Serialize before taking the lock; a bad payload writes nothing.
        let mut buffer = String::new();
        for item in items {
            buffer.push_str(&serde_json::to_string(&item.payload)?);
            buffer.push('\n');
        }

        let mut file = self.file.lock().await;
        file.write_all(buffer.as_bytes())
            .await
            .map_err(|e| sink_error(&self.path, e))?;
        file.flush().await.map_err(|e| sink_error(&self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| sink_error(&self.path, e))?;

        self.written
            .fetch_add(items.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self) -> Result<(), AppError> {
        let mut file = self.file.lock().await;
        file.flush().await.map_err(|e| sink_error(&self.path, e))
    }
}

fn sink_error(path: &Path, e: std::io::Error) -> AppError {
    AppError::SinkWrite(format!("{}: {}", path.display(), e))
}
