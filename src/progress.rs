//! Progress reporting for chunk transfers.

/// Progress information for uploads and downloads.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Chunks completed so far
    pub chunks_done: usize,
    /// Total chunks in the object
    pub chunks_total: usize,
    /// Bytes transferred so far
    pub done: u64,
    /// Total bytes to transfer
    pub total: u64,
    /// Display name of the object being transferred
    pub filename: String,
}

impl TransferProgress {
    /// Create a new progress report.
    pub fn new(
        chunks_done: usize,
        chunks_total: usize,
        done: u64,
        total: u64,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            chunks_done,
            chunks_total,
            done,
            total,
            filename: filename.into(),
        }
    }

    /// Get progress as a percentage (0.0 to 100.0).
    pub fn percent(&self) -> f64 {
        if self.chunks_total == 0 {
            return 0.0;
        }
        if self.total == 0 {
            return (self.chunks_done as f64 / self.chunks_total as f64) * 100.0;
        }
        (self.done as f64 / self.total as f64) * 100.0
    }

    /// Check if transfer is complete.
    pub fn is_complete(&self) -> bool {
        self.chunks_done >= self.chunks_total
    }
}

/// Type alias for progress callback function.
///
/// Callbacks only observe; cancellation goes through the pipeline's
/// `CancellationToken`.
pub type ProgressCallback = Box<dyn FnMut(&TransferProgress) + Send>;
