//! Transfer statistics types.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Statistics for a finished transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStats {
    /// Total size of the file in bytes.
    pub size: u64,
    /// Bytes fetched by this run. Smaller than `size` after a resume.
    pub transferred: u64,
    /// Bytes already on disk when this run started.
    pub resumed_from: u64,
    /// Time taken by this run.
    pub elapsed: Duration,
    /// Average speed of this run in bytes per second.
    pub average_speed: u64,
    /// Peak speed in bytes per second.
    pub peak_speed: u64,
}

impl FileStats {
    /// Returns true if the run continued a previous partial transfer.
    #[must_use]
    pub const fn was_resumed(&self) -> bool {
        self.resumed_from > 0
    }
}

/// Internal helper for tracking transfer statistics while segments are running.
#[derive(Debug)]
pub struct TransferStatsTracker {
    start_time: Instant,
    transferred: AtomicU64,
    peak_speed: AtomicU64,
}

impl Default for TransferStatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferStatsTracker {
    /// Creates a tracker whose clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            transferred: AtomicU64::new(0),
            peak_speed: AtomicU64::new(0),
        }
    }

    /// Records transferred bytes and returns the current speed (bytes/sec).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn record_bytes(&self, bytes: u64) -> u64 {
        let total = self.transferred.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let secs = self.start_time.elapsed().as_secs_f64();
        if secs > 0.0 {
            let speed = (total as f64 / secs) as u64;
            self.peak_speed.fetch_max(speed, Ordering::Relaxed);
            speed
        } else {
            0
        }
    }

    /// Bytes recorded so far.
    #[must_use]
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    /// Returns the elapsed time since the tracker was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns the average speed in bytes per second.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            (self.transferred() as f64 / secs) as u64
        } else {
            0
        }
    }

    /// Returns the peak speed recorded.
    #[must_use]
    pub fn peak_speed(&self) -> u64 {
        self.peak_speed.load(Ordering::Relaxed)
    }

    /// Builds the final statistics for a file of `size` bytes.
    #[must_use]
    pub fn file_stats(&self, size: u64, resumed_from: u64) -> FileStats {
        FileStats {
            size,
            transferred: self.transferred(),
            resumed_from,
            elapsed: self.elapsed(),
            average_speed: self.average_speed(),
            peak_speed: self.peak_speed(),
        }
    }
}
