//! NATS JetStream adapter (feature `gateway-nats`). A queue is a stream bound
//! to a single subject of the same name, with no age limit.
use crate::gateway::{
    ConnectOptions, MessageTtl, Provisioned, QueueGateway, QueueHandle, TransportError,
};
use async_nats::jetstream::{self, stream};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

pub struct NatsGateway {
    client: async_nats::Client,
    js: jetstream::Context,
    subject_prefix: String,
}

pub async fn connect(opts: ConnectOptions) -> Result<Arc<dyn QueueGateway>, TransportError> {
    let url = opts.get("url").unwrap_or("nats://127.0.0.1:4222").to_string();
    let subject_prefix = opts.get("subject_prefix").unwrap_or("qf").to_string();
    let client = async_nats::connect(url.as_str())
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    let js = jetstream::new(client.clone());
    Ok(Arc::new(NatsGateway { client, js, subject_prefix }))
}

impl NatsGateway {
    fn subject(&self, queue: &str) -> String {
        format!("{}.{}", self.subject_prefix, queue)
    }
}

#[async_trait::async_trait]
impl QueueGateway for NatsGateway {
    async fn create_queue_if_not_exists(&self, name: &str) -> Result<Provisioned, TransportError> {
        if self.js.get_stream(name).await.is_ok() {
            return Ok(Provisioned::Existing(QueueHandle::new(name)));
        }
        self.js
            .get_or_create_stream(stream::Config {
                name: name.to_string(),
                subjects: vec![self.subject(name)],
                // Zero means unlimited retention.
                max_age: Duration::ZERO,
                ..Default::default()
            })
            .await
            .map_err(|e| TransportError::Create(e.to_string()))?;
        Ok(Provisioned::Created(QueueHandle::new(name)))
    }

    async fn send(
        &self,
        queue: &QueueHandle,
        payload: Bytes,
        ttl: MessageTtl,
    ) -> Result<(), TransportError> {
        if let MessageTtl::After(_) = ttl {
            return Err(TransportError::Unsupported(
                "per-message ttl on jetstream streams".into(),
            ));
        }
        let ack = self
            .js
            .publish(self.subject(queue.name()), payload)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        ack.await.map_err(|e| TransportError::Send(e.to_string()))?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }
}
