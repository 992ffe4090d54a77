//! Progress delivery shared by both pipelines.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::types::{stage_percent, Progress};

/// Wraps a caller's progress callback.
///
/// Percentages never go backwards, and a failure is reported at the last
/// percentage reached.
pub(crate) struct ProgressSink<'a, S> {
    callback: &'a (dyn Fn(Progress<S>) + Send + Sync),
    last_percent: AtomicU8,
}

impl<'a, S: Copy> ProgressSink<'a, S> {
    pub(crate) fn new(callback: &'a (dyn Fn(Progress<S>) + Send + Sync)) -> Self {
        Self {
            callback,
            last_percent: AtomicU8::new(0),
        }
    }

    /// Reports progress inside the `window` slice of 0..=100.
    pub(crate) fn stage(&self, status: S, window: (u8, u8), bytes_processed: u64, total_bytes: u64) {
        let percent = stage_percent(window.0, window.1, bytes_processed, total_bytes);
        self.emit(status, percent, bytes_processed, total_bytes);
    }

    /// Reports a terminal state at an explicit percentage.
    pub(crate) fn emit(&self, status: S, percent: u8, bytes_processed: u64, total_bytes: u64) {
        let percent = self.last_percent.fetch_max(percent, Ordering::SeqCst).max(percent);
        (self.callback)(Progress {
            status,
            percent,
            bytes_processed,
            total_bytes,
        });
    }

    /// Reports a failure at the last percentage reached.
    pub(crate) fn fail(&self, status: S) {
        let percent = self.last_percent.load(Ordering::SeqCst).min(99);
        (self.callback)(Progress {
            status,
            percent,
            bytes_processed: 0,
            total_bytes: 0,
        });
    }
}
