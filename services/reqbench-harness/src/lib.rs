//! In-process benchmark harness for the requirements-management service.
//!
//! A run provisions a throwaway database, seeds it to a chosen size, serves
//! the application on an ephemeral port and drives it with a mixed HTTP
//! workload while the metrics collector records latency, throughput, error
//! taxonomy and runtime statistics.
//!
//! ```no_run
//! use reqbench_core::HarnessConfig;
//! use reqbench_harness::{preset, ScenarioRunner};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let runner = ScenarioRunner::new(HarnessConfig::default())?;
//! let outcome = runner.run(&preset("crud-smoke")?).await;
//! assert_eq!(outcome.exit_code(), 0);
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod operations;
pub mod profiles;
pub mod runner;
pub mod server;
pub mod telemetry;

pub use driver::{DriveReport, WorkloadDriver};
pub use operations::WorkloadContext;
pub use profiles::{preset, PRESETS};
pub use runner::{RunOutcome, ScenarioRunner};
pub use server::HarnessServer;
pub use telemetry::init_tracing;
