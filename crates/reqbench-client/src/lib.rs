//! HTTP client for driving the application under test.
//!
//! One [`HarnessClient`] is shared by every worker of a run. It holds a
//! single bearer token, a reqwest keep-alive pool, and routes every request
//! through the reliability manager's retry and timeout policy.

pub mod client;
pub mod error;
pub mod tracker;

pub use client::HarnessClient;
pub use error::{classify_transport_error, matches_retryable_pattern, ClientError, RETRYABLE_PATTERNS};
pub use tracker::HttpTracker;
