pub mod auth;
pub mod latency;

pub use auth::{auth_middleware, mint_token, Caller, Claims, TokenError, TokenVerifier};
pub use latency::latency_middleware;
