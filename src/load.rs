use crate::cancel::CancelListener;
use crate::error::RunError;
use crate::gateway::{MessageTtl, QueueGateway};
use crate::metrics::stats::SendEvent;
use crate::payload::item_payload;
use crate::rate::RateController;
use crate::report::{QueueDescriptor, QueueRunResult, SendOutcome};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Per-queue send settings, fixed for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct LoadSettings {
    pub item_count: u64,
    pub concurrency_limit: usize,
    pub rate_per_queue: Option<f64>,
    pub ttl: MessageTtl,
}

/// Pushes `item_count` items into one queue with at most `concurrency_limit`
/// sends in flight. Cheap to clone; clones share the gateway.
#[derive(Clone)]
pub struct LoadGenerator {
    gateway: Arc<dyn QueueGateway>,
    settings: LoadSettings,
    events: Option<flume::Sender<SendEvent>>,
}

impl LoadGenerator {
    pub fn new(gateway: Arc<dyn QueueGateway>, settings: LoadSettings) -> Self {
        Self {
            gateway,
            settings,
            events: None,
        }
    }

    /// Report every resolved send on `events` for progress tracking.
    pub fn with_events(mut self, events: flume::Sender<SendEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Attempt every item exactly once. Send errors are recorded per item and
    /// never stop the batch. On cancellation no further sends start; those
    /// already in flight are awaited before returning [`RunError::Cancelled`].
    pub async fn load(
        &self,
        descriptor: &QueueDescriptor,
        mut cancel: CancelListener,
    ) -> Result<QueueRunResult, RunError> {
        let item_count = self.settings.item_count;
        let window = self.settings.concurrency_limit.max(1);
        let mut rate = self
            .settings
            .rate_per_queue
            .map(RateController::new)
            .transpose()?;
        info!(queue = %descriptor.name, items = item_count, window, "starting load");

        let mut result = QueueRunResult::new(descriptor.clone());
        let mut inflight = FuturesUnordered::new();
        let mut next_index = 1u64;
        let mut cancelled = false;
        // False once every cancel handle is gone and cancellation can no longer arrive.
        let mut cancel_live = true;

        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
            }
            let can_start = !cancelled && next_index <= item_count && inflight.len() < window;
            if !can_start {
                match inflight.next().await {
                    Some(outcome) => result.record(outcome),
                    None => break,
                }
                continue;
            }

            // In-flight sends keep resolving while we wait for the next slot.
            tokio::select! {
                biased;
                live = cancel.cancelled(), if cancel_live => {
                    if live {
                        cancelled = true;
                    } else {
                        cancel_live = false;
                    }
                }
                Some(outcome) = inflight.next(), if !inflight.is_empty() => result.record(outcome),
                _ = next_slot(&mut rate) => {
                    if cancel.is_cancelled() {
                        cancelled = true;
                    } else {
                        inflight.push(self.send_item(descriptor, next_index));
                        next_index += 1;
                    }
                }
            }
        }

        if cancelled {
            debug!(
                queue = %descriptor.name,
                attempted = result.attempted,
                "load cancelled"
            );
            return Err(RunError::Cancelled);
        }

        info!(
            queue = %descriptor.name,
            succeeded = result.succeeded,
            failed = result.failed,
            "finished load"
        );
        Ok(result.finish())
    }

    async fn send_item(&self, descriptor: &QueueDescriptor, index: u64) -> SendOutcome {
        let started = Instant::now();
        let res = self
            .gateway
            .send(&descriptor.handle, item_payload(index), self.settings.ttl)
            .await;
        let latency_ns = started.elapsed().as_nanos() as u64;

        let (outcome, event) = match res {
            Ok(()) => (SendOutcome::success(index), SendEvent::Sent { latency_ns }),
            Err(e) => {
                debug!(queue = %descriptor.name, item = index, error = %e, "send failed");
                (SendOutcome::failure(index, &e), SendEvent::Failed { latency_ns })
            }
        };
        if let Some(events) = &self.events {
            // Progress only; a closed receiver must not affect the batch.
            let _ = events.send_async(event).await;
        }
        outcome
    }
}

async fn next_slot(rate: &mut Option<RateController>) {
    if let Some(rc) = rate {
        rc.wait_for_next().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelHandle;
    use crate::gateway::mock::MockGateway;
    use crate::gateway::{QueueHandle, TransportError};
    use crate::payload::parse_item_index;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn settings(item_count: u64, concurrency_limit: usize) -> LoadSettings {
        LoadSettings {
            item_count,
            concurrency_limit,
            rate_per_queue: None,
            ttl: MessageTtl::Infinite,
        }
    }

    async fn provisioned(mock: &MockGateway, name: &str) -> QueueDescriptor {
        let handle = mock
            .create_queue_if_not_exists(name)
            .await
            .unwrap()
            .into_handle();
        QueueDescriptor { ordinal: 1, name: name.to_string(), handle }
    }

    #[tokio::test]
    async fn every_item_is_sent_exactly_once() {
        let mock = MockGateway::new();
        let q = provisioned(&mock, "q-1").await;
        let generator = LoadGenerator::new(Arc::new(mock.clone()), settings(25, 4));
        let result = generator.load(&q, CancelHandle::new().listener()).await.unwrap();

        assert_eq!((result.attempted, result.succeeded, result.failed), (25, 25, 0));
        let indices: BTreeSet<_> = mock
            .messages("q-1")
            .iter()
            .map(|m| parse_item_index(&m.payload).unwrap())
            .collect();
        assert_eq!(indices, (1..=25).collect());
        assert!(mock.messages("q-1").iter().all(|m| m.ttl == MessageTtl::Infinite));
    }

    #[tokio::test]
    async fn respects_concurrency_window() {
        let mock = MockGateway::new().with_send_delay(Duration::from_millis(2));
        let q = provisioned(&mock, "q-1").await;
        let generator = LoadGenerator::new(Arc::new(mock.clone()), settings(40, 3));
        generator.load(&q, CancelHandle::new().listener()).await.unwrap();
        assert!(mock.max_in_flight() <= 3);
        assert!(mock.max_in_flight() >= 2);
    }

    #[tokio::test]
    async fn failures_are_recorded_and_batch_continues() {
        let mock = MockGateway::new().with_send_fault(|_, payload| {
            (parse_item_index(payload)? % 4 == 0).then_some(TransportError::Throttled)
        });
        let q = provisioned(&mock, "q-1").await;
        let generator = LoadGenerator::new(Arc::new(mock.clone()), settings(12, 5));
        let result = generator.load(&q, CancelHandle::new().listener()).await.unwrap();

        assert_eq!((result.attempted, result.succeeded, result.failed), (12, 9, 3));
        let failed: Vec<_> = result.failures.iter().map(|o| o.item_index).collect();
        assert_eq!(failed, vec![4, 8, 12]);
        assert_eq!(result.failures[0].error.as_deref(), Some("throttled"));
        assert_eq!(mock.send_calls(), 12);
    }

    #[tokio::test]
    async fn emits_progress_events() {
        let mock = MockGateway::new();
        let q = provisioned(&mock, "q-1").await;
        let (tx, rx) = flume::unbounded();
        let generator = LoadGenerator::new(Arc::new(mock), settings(6, 2)).with_events(tx);
        generator.load(&q, CancelHandle::new().listener()).await.unwrap();
        drop(generator);
        let events: Vec<_> = rx.drain().collect();
        assert_eq!(events.len(), 6);
        assert!(events.iter().all(|e| matches!(e, SendEvent::Sent { .. })));
    }

    #[tokio::test]
    async fn cancellation_stops_new_sends() {
        let mock = MockGateway::new().with_send_delay(Duration::from_millis(5));
        let q = provisioned(&mock, "q-1").await;
        let generator = LoadGenerator::new(Arc::new(mock.clone()), settings(10_000, 2));
        let handle = CancelHandle::new();
        let listener = handle.listener();
        let task = tokio::spawn(async move { generator.load(&q, listener).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.cancel();

        let res = task.await.unwrap();
        assert!(matches!(res, Err(RunError::Cancelled)));
        assert!(mock.send_calls() < 10_000);
    }

    #[tokio::test]
    async fn paced_sends_are_spaced_out() {
        let mock = MockGateway::new();
        let q = provisioned(&mock, "q-1").await;
        let paced = LoadSettings { rate_per_queue: Some(50.0), ..settings(6, 10) };
        let generator = LoadGenerator::new(Arc::new(mock.clone()), paced);
        let started = tokio::time::Instant::now();
        let result = generator.load(&q, CancelHandle::new().listener()).await.unwrap();

        assert_eq!((result.attempted, result.succeeded), (6, 6));
        // First slot is immediate, the other five are 20ms apart.
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(mock.send_calls(), 6);
    }

    #[tokio::test]
    async fn paced_sends_progress_between_slots() {
        let mock = MockGateway::new();
        let q = provisioned(&mock, "q-1").await;
        let paced = LoadSettings { rate_per_queue: Some(4.0), ..settings(100, 10) };
        let generator = LoadGenerator::new(Arc::new(mock.clone()), paced);
        let task = tokio::spawn(async move {
            generator.load(&q, CancelHandle::new().listener()).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        // The first item lands without waiting for the second slot.
        assert_eq!(mock.messages("q-1").len(), 1);
        task.abort();
    }

    #[tokio::test]
    async fn cancel_while_waiting_for_a_slot_starts_nothing_new() {
        let mock = MockGateway::new();
        let q = provisioned(&mock, "q-1").await;
        let paced = LoadSettings { rate_per_queue: Some(2.0), ..settings(100, 10) };
        let generator = LoadGenerator::new(Arc::new(mock.clone()), paced);
        let handle = CancelHandle::new();
        let listener = handle.listener();
        let task = tokio::spawn(async move { generator.load(&q, listener).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let before_cancel = mock.send_calls();
        assert_eq!(before_cancel, 1);
        handle.cancel();

        let started = tokio::time::Instant::now();
        let res = task.await.unwrap();
        assert!(matches!(res, Err(RunError::Cancelled)));
        // Returns without sitting out the 500ms slot.
        assert!(started.elapsed() < Duration::from_millis(250));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(mock.send_calls(), before_cancel);
    }

    #[tokio::test]
    async fn invalid_rate_fails_before_any_send() {
        let mock = MockGateway::new();
        let q = provisioned(&mock, "q-1").await;
        let paced = LoadSettings { rate_per_queue: Some(1e-20), ..settings(3, 1) };
        let generator = LoadGenerator::new(Arc::new(mock.clone()), paced);
        let res = generator.load(&q, CancelHandle::new().listener()).await;
        assert!(matches!(res, Err(RunError::ContractViolation(_))));
        assert_eq!(mock.send_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_queue_fails_every_item() {
        let mock = MockGateway::new();
        let q = QueueDescriptor {
            ordinal: 1,
            name: "ghost".into(),
            handle: QueueHandle::new("ghost"),
        };
        let generator = LoadGenerator::new(Arc::new(mock), settings(3, 3));
        let result = generator.load(&q, CancelHandle::new().listener()).await.unwrap();
        assert_eq!(result.failed, 3);
    }
}
