use crate::buffer::BufferStats;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Sliding window of processing latencies
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    samples: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    pub fn new(window_size: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size: window_size.max(1),
        }
    }

    /// Record a measurement in nanoseconds, forgetting the oldest once full
    pub fn record(&self, nanos: u64) {
        let mut samples = self.samples.lock();
        if samples.len() >= self.window_size {
            samples.pop_front();
        }
        samples.push_back(nanos);
    }

    /// The `p`-quantile (0.0-1.0) of the recorded window, zero when empty
    pub fn percentile(&self, p: f64) -> Duration {
        let mut sorted: Vec<u64> = self.samples.lock().iter().copied().collect();
        if sorted.is_empty() {
            return Duration::ZERO;
        }
        sorted.sort_unstable();
        let rank = (sorted.len() as f64 * p.clamp(0.0, 1.0)).ceil() as usize;
        Duration::from_nanos(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
    }

    pub fn count(&self) -> usize {
        self.samples.lock().len()
    }
}

/// Consumer-side counters for one run. Clones share state.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    delivered: Arc<AtomicU64>,
    faults: Arc<AtomicU64>,
    latency: PercentileTracker,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            delivered: Arc::new(AtomicU64::new(0)),
            faults: Arc::new(AtomicU64::new(0)),
            latency: PercentileTracker::new(1000),
            start_time: Instant::now(),
        }
    }

    /// Record an output handed to the caller
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a processing step that failed
    pub fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one processing step took
    pub fn record_latency(&self, latency: Duration) {
        self.latency
            .record(u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX));
    }

    pub fn total_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn total_faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Delivered items per second since creation, on the runtime's clock
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_delivered() as f64 / elapsed
        }
    }

    /// Combine these counters with the buffer's into one snapshot
    pub fn snapshot(&self, buffer: BufferStats) -> MetricsSnapshot {
        MetricsSnapshot {
            offered: buffer.offered,
            dropped: buffer.dropped,
            buffered: buffer.len,
            delivered: self.total_delivered(),
            faults: self.total_faults(),
            throughput: self.throughput(),
            latency_p50: self.latency.percentile(0.50),
            latency_p95: self.latency.percentile(0.95),
            latency_p99: self.latency.percentile(0.99),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters of a run at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Items the producer offered to the buffer
    pub offered: u64,
    /// Items the overflow policy discarded
    pub dropped: u64,
    /// Items still held by the buffer
    pub buffered: usize,
    pub delivered: u64,
    pub faults: u64,
    pub throughput: f64,
    pub latency_p50: Duration,
    pub latency_p95: Duration,
    pub latency_p99: Duration,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// One-line human-readable summary
    pub fn format(&self) -> String {
        format!(
            "Offered: {}, Dropped: {}, Buffered: {}, Delivered: {}, Faults: {}, \
             Throughput: {:.2} items/s, Latency P50: {:?}, P95: {:?}, P99: {:?}, Elapsed: {:.2}s",
            self.offered,
            self.dropped,
            self.buffered,
            self.delivered,
            self.faults,
            self.throughput,
            self.latency_p50,
            self.latency_p95,
            self.latency_p99,
            self.elapsed.as_secs_f64()
        )
    }
}
