use crate::gateway::TransportError;

/// Whole-run failures. Per-item send errors never surface here; they are
/// recorded in the report instead.
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("contract violation: {0}")]
    ContractViolation(String),
    #[error("provisioning failed for {} of {total} queues{}", .failures.len(), describe(.failures))]
    Provisioning {
        failures: Vec<(u32, TransportError)>,
        total: u32,
    },
    #[error("run aborted: queue {ordinal}: {reason}")]
    Aborted { ordinal: u32, reason: String },
    #[error("run cancelled")]
    Cancelled,
}

fn describe(failures: &[(u32, TransportError)]) -> String {
    match failures.first() {
        Some((ordinal, err)) => format!(" (first: queue {ordinal}: {err})"),
        None => String::new(),
    }
}

impl RunError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
