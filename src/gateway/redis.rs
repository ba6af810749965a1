//! Redis adapter (feature `gateway-redis`). Each queue is a list; a registry set
//! records which queues have been provisioned so create-if-absent is observable.
use crate::gateway::{
    ConnectOptions, MessageTtl, Provisioned, QueueGateway, QueueHandle, TransportError,
};
use bytes::Bytes;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::sync::Arc;

pub struct RedisGateway {
    conn: ConnectionManager,
    registry_key: String,
}

pub async fn connect(opts: ConnectOptions) -> Result<Arc<dyn QueueGateway>, TransportError> {
    let url = opts
        .get("url")
        .map(str::to_string)
        .unwrap_or_else(|| "redis://127.0.0.1:6379".into());
    let registry_key = opts.get("registry").unwrap_or("queue-flood:queues").to_string();
    let client = redis::Client::open(url.as_str())
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    let conn = client
        .get_connection_manager()
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    Ok(Arc::new(RedisGateway { conn, registry_key }))
}

#[async_trait::async_trait]
impl QueueGateway for RedisGateway {
    async fn create_queue_if_not_exists(&self, name: &str) -> Result<Provisioned, TransportError> {
        let mut conn = self.conn.clone();
        let added: i64 = conn
            .sadd(&self.registry_key, name)
            .await
            .map_err(|e| TransportError::Create(e.to_string()))?;
        let handle = QueueHandle::new(name);
        Ok(if added > 0 {
            Provisioned::Created(handle)
        } else {
            Provisioned::Existing(handle)
        })
    }

    async fn send(
        &self,
        queue: &QueueHandle,
        payload: Bytes,
        ttl: MessageTtl,
    ) -> Result<(), TransportError> {
        // List elements cannot expire individually.
        if let MessageTtl::After(_) = ttl {
            return Err(TransportError::Unsupported(
                "per-message ttl on redis lists".into(),
            ));
        }
        let mut conn = self.conn.clone();
        let _len: i64 = conn
            .rpush(queue.name(), payload.as_ref())
            .await
            .map_err(map_send_error)?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(())
    }
}

fn map_send_error(e: redis::RedisError) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connection_dropped() {
        TransportError::Disconnected
    } else {
        TransportError::Send(e.to_string())
    }
}
