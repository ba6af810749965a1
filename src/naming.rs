use std::fmt;

use serde::Serialize;

use crate::error::RunError;

const RUN_ID_LEN: usize = 8;

/// Token that namespaces every queue created by one run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RunIdentity(String);

impl RunIdentity {
    pub fn generate() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        Self(simple[..RUN_ID_LEN].to_string())
    }

    /// Accept a caller-supplied token, e.g. to re-provision an earlier run.
    pub fn parse(s: &str) -> Result<Self, RunError> {
        let token = s.trim().to_ascii_lowercase();
        if token.len() != RUN_ID_LEN || !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RunError::ContractViolation(format!(
                "run id must be {RUN_ID_LEN} hex characters, got {s:?}"
            )));
        }
        Ok(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of queue `ordinal` in `run`, e.g. `queue-1a2b3c4d-007`.
///
/// Ordinals are 1-based; passing 0 is a caller bug.
pub fn queue_name(prefix: &str, run: &RunIdentity, ordinal: u32) -> String {
    assert!(ordinal >= 1, "queue ordinals start at 1");
    format!("{prefix}-{run}-{ordinal:03}")
}
