use crate::error::RunError;
use crate::gateway::{Provisioned, QueueGateway};
use crate::naming::{RunIdentity, queue_name};
use crate::report::QueueDescriptor;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ensures every queue of a run exists.
pub struct QueueProvisioner {
    gateway: Arc<dyn QueueGateway>,
    prefix: String,
}

impl QueueProvisioner {
    pub fn new(gateway: Arc<dyn QueueGateway>, prefix: impl Into<String>) -> Self {
        Self {
            gateway,
            prefix: prefix.into(),
        }
    }

    /// Create queues `1..=count` if absent. All create calls run concurrently
    /// and all of them resolve before this returns. Any failure fails the
    /// whole call; queues created along the way are left in place.
    pub async fn provision(
        &self,
        run: &RunIdentity,
        count: u32,
    ) -> Result<BTreeMap<u32, QueueDescriptor>, RunError> {
        if count == 0 {
            return Err(RunError::ContractViolation(
                "cannot provision zero queues".into(),
            ));
        }

        let attempts = (1..=count).map(|ordinal| {
            let name = queue_name(&self.prefix, run, ordinal);
            let gateway = Arc::clone(&self.gateway);
            async move {
                let res = gateway.create_queue_if_not_exists(&name).await;
                (ordinal, name, res)
            }
        });

        let mut queues = BTreeMap::new();
        let mut failures = Vec::new();
        for (ordinal, name, res) in join_all(attempts).await {
            match res {
                Ok(provisioned) => {
                    match &provisioned {
                        Provisioned::Created(_) => info!(queue = %name, "created queue"),
                        Provisioned::Existing(_) => debug!(queue = %name, "queue already exists"),
                    }
                    let handle = provisioned.into_handle();
                    queues.insert(ordinal, QueueDescriptor { ordinal, name, handle });
                }
                Err(e) => {
                    warn!(queue = %name, error = %e, "failed to create queue");
                    failures.push((ordinal, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(queues)
        } else {
            Err(RunError::Provisioning {
                failures,
                total: count,
            })
        }
    }
}
