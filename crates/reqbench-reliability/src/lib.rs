//! Reliability features for benchmark runs: stage timeouts, retry with
//! exponential backoff, preflight checks, resource monitoring with graceful
//! degradation, and the ordered cleanup manager.

pub mod cleanup;
pub mod manager;
pub mod monitor;
pub mod preflight;
pub mod retry;
pub mod timeouts;
pub mod trackers;

pub use cleanup::{
    priority, CleanupManager, CleanupReport, CleanupTask, ResourceTracker, TaskOutcome,
    TaskStatus, TrackerReport,
};
pub use manager::ReliabilityManager;
pub use monitor::{
    DegradationConfig, Level, ProcessProbe, ResourceMonitor, ResourceProbe, ResourceReading,
    Signal, Thresholds, Transition,
};
pub use preflight::{CheckOutcome, PreflightCheck, PreflightRegistry, PreflightReport};
pub use retry::{retry_with_backoff, with_timeout, RetryOutcome};
pub use timeouts::StageTimeouts;
pub use trackers::MemoryTracker;

use std::any::Any;

/// Renders a panic payload as text.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
