//! Run outcome types: per-item outcomes, per-queue results, and the run report.

use crate::gateway::QueueHandle;
use crate::metrics::stats::LatencySummary;
use crate::naming::RunIdentity;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueDescriptor {
    pub ordinal: u32,
    pub name: String,
    #[serde(skip)]
    pub handle: QueueHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    pub item_index: u64,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn success(item_index: u64) -> Self {
        Self { item_index, succeeded: true, error: None }
    }

    pub fn failure(item_index: u64, error: impl fmt::Display) -> Self {
        Self { item_index, succeeded: false, error: Some(error.to_string()) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueRunResult {
    #[serde(flatten)]
    pub descriptor: QueueDescriptor,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Failed items in increasing item order.
    pub failures: Vec<SendOutcome>,
}

impl QueueRunResult {
    pub fn new(descriptor: QueueDescriptor) -> Self {
        Self {
            descriptor,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: SendOutcome) {
        self.attempted += 1;
        if outcome.succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            self.failures.push(outcome);
        }
    }

    /// Sends complete out of order; failures are presented by item index.
    pub fn finish(mut self) -> Self {
        self.failures.sort_by_key(|o| o.item_index);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_identity: RunIdentity,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub queues: Vec<QueueRunResult>,
    pub total_attempted: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub latency: LatencySummary,
    /// Sends resolved per second over the whole run.
    pub throughput_per_sec: f64,
}

impl RunReport {
    /// Merge per-queue results; they are ordered by ordinal regardless of the
    /// order they finished in.
    pub fn assemble(
        run_identity: RunIdentity,
        started_at: DateTime<Utc>,
        mut queues: Vec<QueueRunResult>,
        latency: LatencySummary,
        throughput_per_sec: f64,
    ) -> Self {
        queues.sort_by_key(|q| q.descriptor.ordinal);
        let (total_attempted, total_succeeded, total_failed) = queues
            .iter()
            .fold((0, 0, 0), |(a, s, f), q| (a + q.attempted, s + q.succeeded, f + q.failed));
        Self {
            run_identity,
            started_at,
            finished_at: Utc::now(),
            queues,
            total_attempted,
            total_succeeded,
            total_failed,
            latency,
            throughput_per_sec,
        }
    }

    pub fn failure_ratio(&self) -> f64 {
        if self.total_attempted == 0 {
            0.0
        } else {
            self.total_failed as f64 / self.total_attempted as f64
        }
    }

    /// Whether the share of failed sends stays within `max_ratio`.
    pub fn within_error_budget(&self, max_ratio: f64) -> bool {
        self.failure_ratio() <= max_ratio
    }

    pub fn queue(&self, ordinal: u32) -> Option<&QueueRunResult> {
        self.queues.iter().find(|q| q.descriptor.ordinal == ordinal)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        writeln!(f, "Run [{}] finished in {:.2}s", self.run_identity, elapsed)?;
        for q in &self.queues {
            writeln!(
                f,
                "  {:>4} {:<28} attempted={} succeeded={} failed={}",
                q.descriptor.ordinal, q.descriptor.name, q.attempted, q.succeeded, q.failed
            )?;
        }
        writeln!(
            f,
            "  total attempted={} succeeded={} failed={} ({:.3}% failed)",
            self.total_attempted,
            self.total_succeeded,
            self.total_failed,
            self.failure_ratio() * 100.0
        )?;
        write!(
            f,
            "  throughput={:.1} msg/s send latency p50={:.2}ms p99={:.2}ms max={:.2}ms",
            self.throughput_per_sec,
            self.latency.p50_ns as f64 / 1e6,
            self.latency.p99_ns as f64 / 1e6,
            self.latency.max_ns as f64 / 1e6
        )
    }
}
