use crate::cancel::{CancelHandle, CancelListener};
use crate::config::RunConfig;
use crate::error::RunError;
use crate::gateway::QueueGateway;
use crate::load::{LoadGenerator, LoadSettings};
use crate::metrics::stats::{SendEvent, Stats, StatsSnapshot};
use crate::provision::QueueProvisioner;
use crate::report::RunReport;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

/// Drives a whole run: provision, fan out one load generator per queue, and
/// merge the results.
pub struct RunCoordinator {
    gateway: Arc<dyn QueueGateway>,
    snapshot_sink: Option<flume::Sender<StatsSnapshot>>,
}

impl RunCoordinator {
    pub fn new(gateway: Arc<dyn QueueGateway>) -> Self {
        Self {
            gateway,
            snapshot_sink: None,
        }
    }

    /// Forward periodic progress snapshots, e.g. to a CSV writer.
    pub fn with_snapshot_sink(mut self, sink: flume::Sender<StatsSnapshot>) -> Self {
        self.snapshot_sink = Some(sink);
        self
    }

    pub async fn run(
        &self,
        config: &RunConfig,
        mut cancel: CancelListener,
    ) -> Result<RunReport, RunError> {
        config.validate()?;
        let run = config.run_identity()?;
        let started_at = Utc::now();
        info!(
            run = %run,
            queues = config.queue_count,
            items_per_queue = config.items_per_queue,
            concurrency = config.concurrency_limit,
            ">>> starting run"
        );

        let provisioner = QueueProvisioner::new(Arc::clone(&self.gateway), &config.queue_prefix);
        let queues = provisioner.provision(&run, config.queue_count).await?;
        if cancel.is_cancelled() {
            warn!(run = %run, "cancelled before load generation");
            return Err(RunError::Cancelled);
        }

        // Queues stop on either an external cancel or an aborted sibling.
        let local = CancelHandle::new();
        let forwarder = {
            let local = local.clone();
            tokio::spawn(async move {
                if cancel.cancelled().await {
                    local.cancel();
                }
            })
        };

        let stats = Arc::new(Stats::new());
        let (tx, rx) = flume::bounded::<SendEvent>(10_000);
        let stats_worker = {
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                while let Ok(ev) = rx.recv_async().await {
                    stats.record(ev).await;
                }
            })
        };
        let snapshotter = self.spawn_snapshotter(Arc::clone(&stats), config.snapshot_interval_secs);

        let generator = LoadGenerator::new(
            Arc::clone(&self.gateway),
            LoadSettings {
                item_count: config.items_per_queue,
                concurrency_limit: config.concurrency_limit,
                rate_per_queue: config.rate_per_queue,
                ttl: config.message_ttl(),
            },
        )
        .with_events(tx);

        let mut workers: FuturesUnordered<_> = queues
            .into_values()
            .map(|descriptor| {
                let generator = generator.clone();
                let listener = local.listener();
                let ordinal = descriptor.ordinal;
                let handle: JoinHandle<_> =
                    tokio::spawn(async move { generator.load(&descriptor, listener).await });
                async move { (ordinal, handle.await) }
            })
            .collect();
        // Workers hold the only remaining senders.
        drop(generator);

        let mut results = Vec::with_capacity(config.queue_count as usize);
        let mut aborted: Option<RunError> = None;
        let mut cancelled = false;
        while let Some((ordinal, joined)) = workers.next().await {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(RunError::Cancelled)) => cancelled = true,
                Ok(Err(other)) => {
                    error!(queue = ordinal, error = %other, "load worker failed");
                    local.cancel();
                    aborted.get_or_insert(RunError::Aborted {
                        ordinal,
                        reason: other.to_string(),
                    });
                }
                Err(join_err) => {
                    error!(queue = ordinal, error = %join_err, "load worker crashed");
                    local.cancel();
                    aborted.get_or_insert(RunError::Aborted {
                        ordinal,
                        reason: join_err.to_string(),
                    });
                }
            }
        }

        forwarder.abort();
        // Senders are gone once every worker finished; drain remaining events.
        let _ = stats_worker.await;
        if let Some(h) = snapshotter {
            h.abort();
        }
        let final_snapshot = stats.snapshot().await;
        self.forward_snapshot(&final_snapshot);

        if let Some(err) = aborted {
            return Err(err);
        }
        if cancelled {
            warn!(run = %run, "run cancelled");
            return Err(RunError::Cancelled);
        }

        let report = RunReport::assemble(
            run,
            started_at,
            results,
            final_snapshot.latency,
            final_snapshot.total_throughput(),
        );
        info!(
            run = %report.run_identity,
            attempted = report.total_attempted,
            succeeded = report.total_succeeded,
            failed = report.total_failed,
            throughput = report.throughput_per_sec,
            "<<< finished run"
        );
        Ok(report)
    }

    fn spawn_snapshotter(&self, stats: Arc<Stats>, interval_secs: u64) -> Option<JoinHandle<()>> {
        if interval_secs == 0 {
            return None;
        }
        let sink = self.snapshot_sink.clone();
        Some(tokio::spawn(async move {
            let mut t = interval(Duration::from_secs(interval_secs));
            // First tick completes immediately.
            t.tick().await;
            loop {
                t.tick().await;
                let snap = stats.snapshot().await;
                info!(
                    sent = snap.sent_count,
                    errors = snap.error_count,
                    rate = snap.interval_throughput(),
                    p99_ms = snap.latency.p99_ns as f64 / 1_000_000.0,
                    "progress"
                );
                if let Some(sink) = &sink {
                    let _ = sink.send_async(snap).await;
                }
            }
        }))
    }

    fn forward_snapshot(&self, snap: &StatsSnapshot) {
        if let Some(sink) = &self.snapshot_sink {
            let _ = sink.try_send(snap.clone());
        }
    }
}
