use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use offload_protocol::TransferProgress;

use crate::ProgressCallback;

/// Per-attempt progress accounting.
///
/// Created when an attempt starts and dropped when it ends. Throughput
/// is measured against the attempt start, not a sliding window.
pub struct ProgressMeter {
    started_at: Instant,
    total: u64,
    sent: AtomicU64,
    callback: ProgressCallback,
}

impl ProgressMeter {
    /// Starts the clock for a payload of `total` bytes.
    pub fn start(total: u64, callback: ProgressCallback) -> Self {
        Self {
            started_at: Instant::now(),
            total,
            sent: AtomicU64::new(0),
            callback,
        }
    }

    /// Records `bytes` more sent and notifies the callback.
    pub fn advance(&self, bytes: u64) -> TransferProgress {
        let sent = self.sent.fetch_add(bytes, Ordering::SeqCst) + bytes;
        let progress = self.measure(sent);
        (self.callback)(progress);
        progress
    }

    /// Notifies the callback with the current counters.
    pub fn report(&self) -> TransferProgress {
        let progress = self.snapshot();
        (self.callback)(progress);
        progress
    }

    /// Current counters without notifying.
    pub fn snapshot(&self) -> TransferProgress {
        self.measure(self.sent.load(Ordering::SeqCst))
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn measure(&self, sent: u64) -> TransferProgress {
        TransferProgress::measure(sent, self.total, self.elapsed())
    }
}
