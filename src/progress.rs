//! Periodic progress logging for long batch loops.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Default interval between progress lines.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Counts rows through one dataset and logs the rate at most once per interval.
///
/// Row totals are not known up front (exports stream, imports read files
/// once), so progress lines carry the running count and rate only.
pub struct ProgressTracker {
    label: String,
    processed: Mutex<u64>,
    start_time: Instant,
    last_report: Mutex<Instant>,
    interval: Duration,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(label: impl Into<String>, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            label: label.into(),
            processed: Mutex::new(0),
            start_time: now,
            last_report: Mutex::new(now),
            interval,
        }
    }

    /// Add `count` rows and report if the interval has elapsed.
    pub fn advance(&self, count: u64) {
        *self.processed.lock() += count;
        if self.last_report.lock().elapsed() >= self.interval {
            self.report();
        }
    }

    #[must_use]
    pub fn processed(&self) -> u64 {
        *self.processed.lock()
    }

    fn rate(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 { self.processed() as f64 / elapsed } else { 0.0 }
    }

    pub fn report(&self) {
        tracing::info!(
            dataset = %self.label,
            processed = self.processed(),
            rate = format!("{:.0} rows/sec", self.rate()),
            "Progress"
        );
        *self.last_report.lock() = Instant::now();
    }

    #[must_use]
    pub fn finish(&self) -> ProgressStats {
        ProgressStats {
            total_processed: self.processed(),
            total_time: self.start_time.elapsed(),
            avg_rate: self.rate(),
        }
    }
}

/// Final numbers for one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressStats {
    pub total_processed: u64,
    pub total_time: Duration,
    /// rows/sec
    pub avg_rate: f64,
}

impl ProgressStats {
    pub fn elapsed_ms(&self) -> u64 {
        self.total_time.as_millis() as u64
    }

    pub fn rate_label(&self) -> String {
        format!("{:.0} rows/sec", self.avg_rate)
    }
}
