use crate::error::RunError;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// Slowest accepted pace: one send per day.
pub const MIN_RATE_PER_SEC: f64 = 1.0 / 86_400.0;

/// Paces send starts for one queue. Schedules against a fixed cadence so a
/// slow tick does not permanently lower the achieved rate.
pub struct RateController {
    interval: Duration,
    next_slot: Option<Instant>,
}

impl RateController {
    /// Create a rate controller for a target number of sends per second.
    pub fn new(per_second: f64) -> Result<Self, RunError> {
        if !(per_second.is_finite() && per_second >= MIN_RATE_PER_SEC) {
            return Err(RunError::ContractViolation(format!(
                "rate_per_queue must be at least {MIN_RATE_PER_SEC:e} msg/s, got {per_second}"
            )));
        }
        let interval = Duration::try_from_secs_f64(1.0 / per_second)
            .map_err(|e| RunError::ContractViolation(format!("rate_per_queue {per_second}: {e}")))?;
        Ok(Self {
            interval,
            next_slot: None,
        })
    }

    /// Wait until the next send may start. Cancel safe: the slot is only
    /// consumed once the wait completes.
    pub async fn wait_for_next(&mut self) {
        let now = Instant::now();
        let slot = match self.next_slot {
            // Never bank more than one interval of credit after a stall.
            Some(slot) if slot + self.interval >= now => slot,
            _ => now,
        };
        if slot > now {
            sleep_until(slot).await;
        }
        self.next_slot = Some(slot + self.interval);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
