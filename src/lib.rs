//! Bulk multi-queue loader: provisions a set of queues for one run and floods
//! each with sequentially numbered items, recording every send outcome.

pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod load;
pub mod logging;
pub mod metrics;
pub mod naming;
pub mod output;
pub mod payload;
pub mod provision;
pub mod rate;
pub mod report;

pub use cancel::{CancelHandle, CancelListener};
pub use config::RunConfig;
pub use coordinator::RunCoordinator;
pub use error::RunError;
pub use report::{QueueDescriptor, QueueRunResult, RunReport, SendOutcome};
