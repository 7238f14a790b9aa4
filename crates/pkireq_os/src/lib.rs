#![forbid(unsafe_code)]

pub mod config;
pub mod locks;
pub mod queue;

pub use config::{ApprovalThreshold, ConfigError, QueueConfig};
pub use queue::{QueueError, QueueOperation, RecoveryReport, RequestQueue};
