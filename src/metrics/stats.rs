use hdrhistogram::Histogram;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Progress event emitted by a load generator for every resolved send.
#[derive(Debug, Clone, Copy)]
pub enum SendEvent {
    Sent { latency_ns: u64 },
    Failed { latency_ns: u64 },
}

/// Run-wide send statistics: counters plus a send-latency histogram.
pub struct Stats {
    // Latency histogram (nanosecond precision)
    latency_hist: RwLock<Histogram<u64>>,

    sent_count: RwLock<u64>,
    error_count: RwLock<u64>,

    start_time: Instant,
    last_snapshot: RwLock<(Instant, u64)>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            // 1ns to 60s range, 3 significant digits; auto-resizes past that
            latency_hist: RwLock::new(new_histogram()),
            sent_count: RwLock::new(0),
            error_count: RwLock::new(0),
            start_time: now,
            last_snapshot: RwLock::new((now, 0)),
        }
    }

    pub async fn record(&self, event: SendEvent) {
        let latency_ns = match event {
            SendEvent::Sent { latency_ns } => {
                *self.sent_count.write().await += 1;
                latency_ns
            }
            SendEvent::Failed { latency_ns } => {
                *self.error_count.write().await += 1;
                latency_ns
            }
        };
        let _ = self.latency_hist.write().await.record(latency_ns.max(1));
    }

    /// Current snapshot; also advances the interval window.
    pub async fn snapshot(&self) -> StatsSnapshot {
        let now = Instant::now();
        let sent = *self.sent_count.read().await;
        let errors = *self.error_count.read().await;
        let latency = LatencySummary::from_histogram(&*self.latency_hist.read().await);

        let (interval_duration, interval_resolved) = {
            let mut last = self.last_snapshot.write().await;
            let resolved = sent + errors;
            let window = (now.duration_since(last.0), resolved - last.1);
            *last = (now, resolved);
            window
        };

        StatsSnapshot {
            timestamp: chrono::Utc::now().timestamp(),
            sent_count: sent,
            error_count: errors,
            total_duration: now.duration_since(self.start_time),
            interval_duration,
            interval_resolved,
            latency,
        }
    }
}

fn new_histogram() -> Histogram<u64> {
    let mut hist = Histogram::new_with_bounds(1, 60_000_000_000, 3)
        .expect("constant histogram bounds are valid");
    hist.auto(true);
    hist
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
}

impl LatencySummary {
    fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.is_empty() {
            return Self::default();
        }
        Self {
            samples: hist.len(),
            p50_ns: hist.value_at_quantile(0.5),
            p95_ns: hist.value_at_quantile(0.95),
            p99_ns: hist.value_at_quantile(0.99),
            min_ns: hist.min(),
            max_ns: hist.max(),
            mean_ns: hist.mean(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub timestamp: i64,
    pub sent_count: u64,
    pub error_count: u64,
    pub total_duration: Duration,
    pub interval_duration: Duration,
    interval_resolved: u64,
    pub latency: LatencySummary,
}

impl StatsSnapshot {
    pub fn resolved(&self) -> u64 {
        self.sent_count + self.error_count
    }

    /// Sends resolved per second since the previous snapshot.
    pub fn interval_throughput(&self) -> f64 {
        let secs = self.interval_duration.as_secs_f64();
        if secs > 0.0 {
            self.interval_resolved as f64 / secs
        } else {
            0.0
        }
    }

    /// Sends resolved per second over the whole run.
    pub fn total_throughput(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs > 0.0 {
            self.resolved() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{:.2},{:.2},{},{},{},{},{},{:.2}",
            self.timestamp,
            self.sent_count,
            self.error_count,
            self.total_throughput(),
            self.interval_throughput(),
            self.latency.p50_ns,
            self.latency.p95_ns,
            self.latency.p99_ns,
            self.latency.min_ns,
            self.latency.max_ns,
            self.latency.mean_ns
        )
    }

    pub fn csv_header() -> &'static str {
        "timestamp,sent_count,error_count,total_throughput,interval_throughput,latency_ns_p50,latency_ns_p95,latency_ns_p99,latency_ns_min,latency_ns_max,latency_ns_mean"
    }
}
