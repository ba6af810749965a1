//! In-memory gateway (feature `gateway-mock`) with fault and latency injection.
use crate::gateway::{
    ConnectOptions, MessageTtl, Provisioned, QueueGateway, QueueHandle, TransportError,
};
use crate::payload::parse_item_index;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type CreateFault = Arc<dyn Fn(&str) -> Option<TransportError> + Send + Sync>;
type SendFault = Arc<dyn Fn(&str, &[u8]) -> Option<TransportError> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub payload: Bytes,
    pub ttl: MessageTtl,
}

#[derive(Default)]
struct MockState {
    queues: Mutex<BTreeMap<String, Vec<StoredMessage>>>,
    create_calls: AtomicUsize,
    send_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Clones share the same queues and counters, so a test can keep one clone
/// for inspection while another is handed to the code under test.
#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<MockState>,
    create_fault: Option<CreateFault>,
    send_fault: Option<SendFault>,
    send_delay: Option<Duration>,
}

pub async fn connect(opts: ConnectOptions) -> Result<Arc<dyn QueueGateway>, TransportError> {
    let mut gateway = MockGateway::new();
    if let Some(raw) = opts.get("fail_every") {
        let every: u64 = raw
            .parse()
            .map_err(|_| TransportError::Connect(format!("invalid fail_every: {raw}")))?;
        if every > 0 {
            gateway = gateway.with_send_fault(move |_queue, payload| {
                match parse_item_index(payload) {
                    Some(index) if index % every == 0 => {
                        Some(TransportError::Send(format!("injected failure for item {index}")))
                    }
                    _ => None,
                }
            });
        }
    }
    if let Some(raw) = opts.get("delay_ms") {
        let ms: u64 = raw
            .parse()
            .map_err(|_| TransportError::Connect(format!("invalid delay_ms: {raw}")))?;
        gateway = gateway.with_send_delay(Duration::from_millis(ms));
    }
    Ok(Arc::new(gateway))
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `create_queue_if_not_exists` whenever `fault` returns an error.
    pub fn with_create_fault<F>(mut self, fault: F) -> Self
    where
        F: Fn(&str) -> Option<TransportError> + Send + Sync + 'static,
    {
        self.create_fault = Some(Arc::new(fault));
        self
    }

    /// Fail `send` whenever `fault` returns an error. Receives the queue name
    /// and the raw payload.
    pub fn with_send_fault<F>(mut self, fault: F) -> Self
    where
        F: Fn(&str, &[u8]) -> Option<TransportError> + Send + Sync + 'static,
    {
        self.send_fault = Some(Arc::new(fault));
        self
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    pub fn create_calls(&self) -> usize {
        self.state.create_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.state.send_calls.load(Ordering::SeqCst)
    }

    /// Highest number of sends observed in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.lock_queues().keys().cloned().collect()
    }

    pub fn messages(&self, queue: &str) -> Vec<StoredMessage> {
        self.lock_queues().get(queue).cloned().unwrap_or_default()
    }

    fn lock_queues(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<StoredMessage>>> {
        // A panicking fault closure must not wedge later inspection.
        self.state
            .queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct InFlightGuard<'a>(&'a MockState);

impl<'a> InFlightGuard<'a> {
    fn enter(state: &'a MockState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl QueueGateway for MockGateway {
    async fn create_queue_if_not_exists(&self, name: &str) -> Result<Provisioned, TransportError> {
        self.state.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.create_fault.as_ref().and_then(|f| f(name)) {
            return Err(err);
        }
        let mut queues = self.lock_queues();
        let handle = QueueHandle::new(name);
        if queues.contains_key(name) {
            Ok(Provisioned::Existing(handle))
        } else {
            queues.insert(name.to_string(), Vec::new());
            Ok(Provisioned::Created(handle))
        }
    }

    async fn send(
        &self,
        queue: &QueueHandle,
        payload: Bytes,
        ttl: MessageTtl,
    ) -> Result<(), TransportError> {
        self.state.send_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard::enter(&self.state);
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        if let Some(err) = self.send_fault.as_ref().and_then(|f| f(queue.name(), payload.as_ref())) {
            return Err(err);
        }
        match self.lock_queues().get_mut(queue.name()) {
            Some(messages) => {
                messages.push(StoredMessage { payload, ttl });
                Ok(())
            }
            None => Err(TransportError::Send(format!("queue {} does not exist", queue.name()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_idempotent() {
        let gw = MockGateway::new();
        let first = gw.create_queue_if_not_exists("queue-a").await.expect("create");
        let second = gw.create_queue_if_not_exists("queue-a").await.expect("create");
        assert!(first.was_created());
        assert!(!second.was_created());
        assert_eq!(first.into_handle(), second.into_handle());
        assert_eq!(gw.queue_names(), vec!["queue-a".to_string()]);
        assert_eq!(gw.create_calls(), 2);
    }

    #[tokio::test]
    async fn send_to_missing_queue_fails() {
        let gw = MockGateway::new();
        let err = gw
            .send(&QueueHandle::new("nope"), Bytes::from_static(b"x"), MessageTtl::Infinite)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Send(_)));
    }

    #[tokio::test]
    async fn fail_every_option_injects_send_faults() {
        let mut opts = ConnectOptions::default();
        opts.params.insert("fail_every".into(), "2".into());
        let gw = connect(opts).await.expect("connect");
        let handle = gw.create_queue_if_not_exists("q").await.unwrap().into_handle();
        let one = gw
            .send(&handle, crate::payload::item_payload(1), MessageTtl::Infinite)
            .await;
        let two = gw
            .send(&handle, crate::payload::item_payload(2), MessageTtl::Infinite)
            .await;
        assert!(one.is_ok());
        assert!(two.is_err());
    }

    #[tokio::test]
    async fn rejects_bad_options() {
        let mut opts = ConnectOptions::default();
        opts.params.insert("delay_ms".into(), "soon".into());
        assert!(connect(opts).await.is_err());
    }
}
