//! Requirements-management REST service driven by the benchmark harness.
//!
//! Serves `/health`, CRUD for epics, user stories, requirements,
//! acceptance criteria and comments, requirement relationships, and
//! search over any [`reqbench_db::Store`].

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rest;
pub mod state;

pub use error::ApiError;
pub use middleware::{mint_token, Caller, Claims, TokenError, TokenVerifier};
pub use rest::{build_router, HEALTH_PATH};
pub use state::{AppConfig, AppState};
