//! Gateway abstraction: trait, types, and builder factory.

pub mod config;
#[cfg(any(test, feature = "gateway-mock"))]
pub mod mock;
#[cfg(feature = "gateway-nats")]
pub mod nats;
#[cfg(feature = "gateway-redis")]
pub mod redis;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Engine {
    Redis,
    Nats,
    #[cfg(any(test, feature = "gateway-mock"))]
    Mock,
}

#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    pub params: BTreeMap<String, String>,
}

impl ConnectOptions {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("create: {0}")]
    Create(String),
    #[error("send: {0}")]
    Send(String),
    #[error("timeout")]
    Timeout,
    #[error("throttled")]
    Throttled,
    #[error("disconnected")]
    Disconnected,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("other: {0}")]
    Other(String),
}

/// How long the backend should retain a message before expiring it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MessageTtl {
    #[default]
    Infinite,
    After(Duration),
}

/// Reference to a provisioned queue. Cheap to clone and shared by every send
/// targeting the queue.
#[derive(Clone, PartialEq, Eq)]
pub struct QueueHandle {
    name: Arc<str>,
}

impl QueueHandle {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("QueueHandle").field(&self.name).finish()
    }
}

/// Result of a create-if-absent call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provisioned {
    Created(QueueHandle),
    Existing(QueueHandle),
}

impl Provisioned {
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn into_handle(self) -> QueueHandle {
        match self {
            Self::Created(h) | Self::Existing(h) => h,
        }
    }
}

#[async_trait::async_trait]
pub trait QueueGateway: Send + Sync {
    async fn create_queue_if_not_exists(&self, name: &str) -> Result<Provisioned, TransportError>;
    async fn send(
        &self,
        queue: &QueueHandle,
        payload: Bytes,
        ttl: MessageTtl,
    ) -> Result<(), TransportError>;
    async fn health_check(&self) -> Result<(), TransportError> {
        Ok(())
    }
    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct GatewayBuilder;

impl GatewayBuilder {
    pub async fn connect(
        engine: Engine,
        opts: ConnectOptions,
    ) -> Result<Arc<dyn QueueGateway>, TransportError> {
        match engine {
            Engine::Redis => {
                #[cfg(feature = "gateway-redis")]
                {
                    crate::gateway::redis::connect(opts).await
                }
                #[cfg(not(feature = "gateway-redis"))]
                {
                    let _ = opts;
                    Err(TransportError::Connect("redis feature disabled".into()))
                }
            }
            Engine::Nats => {
                #[cfg(feature = "gateway-nats")]
                {
                    crate::gateway::nats::connect(opts).await
                }
                #[cfg(not(feature = "gateway-nats"))]
                {
                    let _ = opts;
                    Err(TransportError::Connect("nats feature disabled".into()))
                }
            }
            #[cfg(any(test, feature = "gateway-mock"))]
            Engine::Mock => crate::gateway::mock::connect(opts).await,
        }
    }
}
