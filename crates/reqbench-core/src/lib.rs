//! Core data model shared by every reqbench crate: request/response records,
//! operation classes, scenario descriptors, the error taxonomy, and the
//! harness configuration.

pub mod config;
pub mod error;
pub mod method;
pub mod op;
pub mod record;
pub mod scenario;
pub mod stage;
pub mod traits;

pub use config::{
    AuthConfig, ClientConfig, DatabaseConfig, HarnessConfig, LoggingConfig, MetricsConfig,
    MonitorConfig, OutputConfig, ReliabilityConfig, ServerConfig, TimeoutsConfig,
};
pub use error::{ErrorKind, HarnessError, HarnessResult};
pub use method::Method;
pub use op::{EntityKind, OpClass};
pub use record::{MetricSample, PoolStats, RequestRecord, ResponseRecord};
pub use scenario::{
    AuthIdentity, DatasetSize, ReliabilityOverrides, Scenario, ScenarioFile, WorkloadFile,
    WorkloadShape,
};
pub use stage::{RetryPolicy, Stage};
pub use traits::{PoolStatsSource, RequestObserver};
