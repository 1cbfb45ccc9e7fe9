use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of latency samples kept per stage
const LATENCY_WINDOW: usize = 1000;

/// Sliding window of latency samples
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a tracker keeping the last `window_size` samples
    pub fn new(window_size: usize) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    /// Record a sample in nanoseconds
    pub fn record(&self, nanos: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(nanos);
    }

    /// Median in microseconds
    /// Median latency in microseconds
    pub fn p50_us(&self) -> f64 {
        self.percentile(0.50)
    }

    /// 99th percentile latency in microseconds
    pub fn p99_us(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let mut sorted: Vec<u64> = self.measurements.lock().iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    /// Number of measurements in the window
    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

/// Counters for one stage, shared between the stage and its observers
///
/// `received` counts values taken from the stage's inputs, `emitted` counts
/// results the user function produced, and latency covers the user function
/// call only, not time spent blocked on conduits.
#[derive(Debug, Clone)]
pub struct StageMetrics {
    received: Arc<AtomicU64>,
    emitted: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    latency_tracker: PercentileTracker,
    start_time: Instant,
}

impl StageMetrics {
    /// Create a new metrics collector for a stage
    pub fn new() -> Self {
        Self {
            received: Arc::new(AtomicU64::new(0)),
            emitted: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            latency_tracker: PercentileTracker::new(LATENCY_WINDOW),
            start_time: Instant::now(),
        }
    }

    /// Record a value taken from an input
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a value produced by the stage
    pub fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run that ended with an error other than cancellation
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the duration of one user function call
    pub fn record_latency(&self, elapsed: Duration) {
        self.latency_tracker.record(elapsed.as_nanos() as u64);
    }

    /// Get the total number of values received
    pub fn total_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Get the total number of values emitted
    pub fn total_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Get the number of failed runs
    pub fn total_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Emitted values per second since the stage was created
    pub fn throughput_per_sec(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_emitted() as f64 / elapsed
        }
    }

    /// Capture the current counters and latency percentiles
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_received: self.total_received(),
            total_emitted: self.total_emitted(),
            total_failed: self.total_failed(),
            throughput_per_sec: self.throughput_per_sec(),
            latency_p50_us: self.latency_tracker.p50_us(),
            latency_p99_us: self.latency_tracker.p99_us(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time copy of a stage's counters
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_received: u64,
    pub total_emitted: u64,
    pub total_failed: u64,
    pub throughput_per_sec: f64,
    pub latency_p50_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format as a single human-readable line
    pub fn format(&self) -> String {
        format!(
            "Received: {}, Emitted: {}, Failed: {}, Throughput: {:.2} msg/s, \
             Latency P50: {:.2}µs, P99: {:.2}µs, Elapsed: {:.2}s",
            self.total_received,
            self.total_emitted,
            self.total_failed,
            self.throughput_per_sec,
            self.latency_p50_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}
