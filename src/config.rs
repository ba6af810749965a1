//! Run configuration: defaults, YAML loading, and validation.

use crate::error::RunError;
use crate::gateway::MessageTtl;
use crate::naming::RunIdentity;
use crate::rate::RateController;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_QUEUE_COUNT: u32 = 20;
pub const DEFAULT_ITEMS_PER_QUEUE: u64 = 50_000;
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 100;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub queue_count: u32,
    pub items_per_queue: u64,
    /// In-flight sends allowed per queue.
    pub concurrency_limit: usize,
    pub queue_prefix: String,
    /// Reuse an earlier run's token instead of generating one.
    pub run_id: Option<String>,
    /// Optional send-rate cap per queue (msg/s).
    pub rate_per_queue: Option<f64>,
    /// Message expiry; absent means messages never expire.
    pub message_ttl_secs: Option<u64>,
    pub snapshot_interval_secs: u64,
    /// Error budget: fraction of failed sends above which the run is flagged.
    pub max_failure_ratio: Option<f64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            queue_count: DEFAULT_QUEUE_COUNT,
            items_per_queue: DEFAULT_ITEMS_PER_QUEUE,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            queue_prefix: "queue".to_string(),
            run_id: None,
            rate_per_queue: None,
            message_ttl_secs: None,
            snapshot_interval_secs: 1,
            max_failure_ratio: None,
        }
    }
}

impl RunConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).context("invalid run config")
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Checked once before any I/O happens.
    pub fn validate(&self) -> Result<(), RunError> {
        let violation = |msg: String| Err(RunError::ContractViolation(msg));
        if self.queue_count == 0 {
            return violation("queue_count must be at least 1".into());
        }
        if self.items_per_queue == 0 {
            return violation("items_per_queue must be at least 1".into());
        }
        if self.concurrency_limit == 0 {
            return violation("concurrency_limit must be at least 1".into());
        }
        if !valid_prefix(&self.queue_prefix) {
            return violation(format!(
                "queue_prefix {:?} must be 1-40 lowercase letters, digits or '-', starting with a letter",
                self.queue_prefix
            ));
        }
        if let Some(rate) = self.rate_per_queue {
            RateController::new(rate)?;
        }
        if self.message_ttl_secs == Some(0) {
            return violation("message_ttl_secs must be positive when set".into());
        }
        if let Some(ratio) = self.max_failure_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return violation(format!("max_failure_ratio must be within [0, 1], got {ratio}"));
            }
        }
        if let Some(id) = &self.run_id {
            RunIdentity::parse(id)?;
        }
        Ok(())
    }

    pub fn message_ttl(&self) -> MessageTtl {
        match self.message_ttl_secs {
            Some(secs) => MessageTtl::After(Duration::from_secs(secs)),
            None => MessageTtl::Infinite,
        }
    }

    /// The supplied run id, or a fresh one.
    pub fn run_identity(&self) -> Result<RunIdentity, RunError> {
        match &self.run_id {
            Some(id) => RunIdentity::parse(id),
            None => Ok(RunIdentity::generate()),
        }
    }
}

fn valid_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && prefix.len() <= 40
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
