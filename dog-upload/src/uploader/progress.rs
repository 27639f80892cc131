use std::time::Duration;

use tokio::time::Instant;

use crate::types::progress_percent;

/// Snapshot reported after each part
#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub completed_parts: u32,
    pub total_parts: u32,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub percent: u8,
    /// Throughput of this run, excluding parts finished by earlier runs
    pub bytes_per_sec: f64,
    pub eta: Option<Duration>,
}

/// Receives progress updates. Returning `false` cancels the upload.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, progress: &UploadProgress) -> bool;
}

/// Always continues
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _progress: &UploadProgress) -> bool {
        true
    }
}

/// A progress callback that wraps a closure.
pub struct FnProgress<F> {
    callback: F,
}

impl<F> ProgressCallback for FnProgress<F>
where
    F: Fn(&UploadProgress) -> bool + Send + Sync,
{
    fn on_progress(&self, progress: &UploadProgress) -> bool {
        (self.callback)(progress)
    }
}

/// Create a progress callback from a closure.
pub fn progress_fn<F>(f: F) -> FnProgress<F>
where
    F: Fn(&UploadProgress) -> bool + Send + Sync,
{
    FnProgress { callback: f }
}

pub(crate) struct ProgressTracker {
    total_parts: u32,
    total_bytes: u64,
    completed_parts: u32,
    uploaded_bytes: u64,
    run_bytes: u64,
    started: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(total_parts: u32, total_bytes: u64, completed_parts: u32, uploaded_bytes: u64) -> Self {
        Self {
            total_parts,
            total_bytes,
            completed_parts,
            uploaded_bytes,
            run_bytes: 0,
            started: Instant::now(),
        }
    }

    pub(crate) fn record_part(&mut self, bytes: u64) -> UploadProgress {
        self.completed_parts += 1;
        self.uploaded_bytes += bytes;
        self.run_bytes += bytes;
        self.snapshot()
    }

    pub(crate) fn snapshot(&self) -> UploadProgress {
        let elapsed = self.started.elapsed().as_secs_f64();
        let bytes_per_sec = if elapsed > 0.0 {
            self.run_bytes as f64 / elapsed
        } else {
            0.0
        };

        let remaining = self.total_bytes.saturating_sub(self.uploaded_bytes);
        let eta = if remaining == 0 {
            Some(Duration::ZERO)
        } else if bytes_per_sec > 0.0 {
            Some(Duration::from_secs_f64(remaining as f64 / bytes_per_sec))
        } else {
            None
        };

        UploadProgress {
            completed_parts: self.completed_parts,
            total_parts: self.total_parts,
            uploaded_bytes: self.uploaded_bytes,
            total_bytes: self.total_bytes,
            percent: progress_percent(self.completed_parts, self.total_parts),
            bytes_per_sec,
            eta,
        }
    }
}
