//! Observational measurement harness: latency percentiles, throughput, and a
//! periodic memory sampler. Nothing here influences query execution.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub count: usize,
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

/// Collects operation latencies behind a mutex-guarded sample buffer.
#[derive(Default)]
pub struct LatencyRecorder {
    samples: Mutex<Vec<Duration>>,
}

impl LatencyRecorder {
    pub fn new() -> Self { Self::default() }

    pub fn record(&self, sample: Duration) { self.samples.lock().expect("latency buffer").push(sample); }

    /// Time one future and record its wall-clock latency.
    pub async fn time<F: std::future::Future>(&self, fut: F) -> F::Output {
        let start = Instant::now();
        let out = fut.await;
        self.record(start.elapsed());
        out
    }

    pub fn summary(&self) -> Option<LatencySummary> {
        let mut samples = self.samples.lock().expect("latency buffer").clone();
        if samples.is_empty() {
            return None;
        }
        samples.sort();
        let count = samples.len();
        let total: Duration = samples.iter().sum();
        let percentile = |p: f64| samples[((count as f64 * p) as usize).min(count - 1)];
        Some(LatencySummary {
            count,
            mean: total / count as u32,
            p50: percentile(0.50),
            p95: percentile(0.95),
            p99: percentile(0.99),
            max: samples[count - 1],
        })
    }
}

/// Operations-per-second counter.
pub struct ThroughputMeter {
    started: Instant,
    operations: AtomicU64,
}

impl Default for ThroughputMeter {
    fn default() -> Self { Self::new() }
}

impl ThroughputMeter {
    pub fn new() -> Self { Self { started: Instant::now(), operations: AtomicU64::new(0) } }

    pub fn record(&self, operations: u64) { self.operations.fetch_add(operations, Ordering::Relaxed); }

    pub fn operations(&self) -> u64 { self.operations.load(Ordering::Relaxed) }

    pub fn per_second(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed == 0.0 { 0.0 } else { self.operations() as f64 / elapsed }
    }
}

/// Background task sampling process memory on an interval. The task exits when
/// the sampler is stopped or dropped.
pub struct MemorySampler {
    samples: Arc<Mutex<Vec<u64>>>,
    task: JoinHandle<()>,
}

impl MemorySampler {
    pub fn spawn(interval: Duration) -> Self { Self::spawn_with_probe(interval, resident_bytes) }

    pub fn spawn_with_probe(interval: Duration, probe: fn() -> u64) -> Self {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let buffer = samples.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                buffer.lock().expect("sample buffer").push(probe());
            }
        });
        Self { samples, task }
    }

    /// Stop sampling and drain the collected samples.
    pub fn stop(self) -> Vec<u64> {
        self.task.abort();
        let samples = self.samples.lock().expect("sample buffer").clone();
        samples
    }

    pub fn peak(&self) -> Option<u64> { self.samples.lock().expect("sample buffer").iter().max().copied() }
}

impl Drop for MemorySampler {
    fn drop(&mut self) { self.task.abort(); }
}

/// Resident set size in bytes, or 0 where the platform offers no cheap probe.
pub fn resident_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(resident_pages) = statm.split_whitespace().nth(1).and_then(|f| f.parse::<u64>().ok()) {
                return resident_pages * 4096;
            }
        }
    }
    0
}
