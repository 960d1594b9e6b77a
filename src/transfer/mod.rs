//! Chunked, resumable transfers over the channel session.

pub mod download;
pub mod integrity;
pub mod journal;
pub mod planner;
pub mod recovery;
pub mod retry;
pub mod upload;

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::progress::{ProgressCallback, TransferProgress};

pub use download::{DownloadPipeline, DownloadReport, IntegrityStatus};
pub use planner::{chunk_count, ChunkPlan, DEFAULT_CHUNK_SIZE};
pub use recovery::{recover, RecoveryRequest};
pub use retry::RetryPolicy;
pub use upload::UploadPipeline;

/// Settings shared by every pipeline run from one store.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub chunk_size: u64,
    pub journal_dir: PathBuf,
    pub slices_dir: PathBuf,
    pub retry: RetryPolicy,
}

impl TransferSettings {
    pub fn from_config(config: &StoreConfig, retry: RetryPolicy) -> Self {
        Self {
            chunk_size: config.chunk_size,
            journal_dir: config.journal_dir(),
            slices_dir: config.slices_dir(),
            retry,
        }
    }
}

/// Per-run controls: cancellation and an optional progress observer.
#[derive(Default)]
pub struct TransferControl {
    pub cancel: CancellationToken,
    pub progress: Option<ProgressCallback>,
}

impl TransferControl {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub(crate) fn report(&mut self, progress: &TransferProgress) {
        if let Some(cb) = self.progress.as_mut() {
            cb(progress);
        }
    }
}

/// Run blocking file work (hashing, slicing) off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Custom(format!("Blocking task failed: {}", e)))?
}
