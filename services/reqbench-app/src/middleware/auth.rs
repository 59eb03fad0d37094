//! Bearer-token authentication (HS256 JWT).

use crate::error::ApiError;
use crate::rest::HEALTH_PATH;
use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use reqbench_core::AuthConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub username: String,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),

    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    #[error("token subject `{0}` is not a user id")]
    Subject(String),
}

/// Authenticated caller, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub username: String,
}

/// Signs a token for `user_id` valid for `auth.token_ttl_secs`.
pub fn mint_token(auth: &AuthConfig, user_id: Uuid, username: &str) -> Result<String, TokenError> {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        exp: now + auth.token_ttl_secs,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(auth.secret.as_bytes()),
    )
    .map_err(TokenError::Sign)
}

pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Caller, TokenError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(TokenError::Invalid)?;
        let user_id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| TokenError::Subject(data.claims.sub.clone()))?;
        Ok(Caller {
            user_id,
            username: data.claims.username,
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Rejects requests without a valid bearer token. `/health` is public.
pub async fn auth_middleware(verifier: Arc<TokenVerifier>, mut request: Request, next: Next) -> Response {
    if request.uri().path() == HEALTH_PATH {
        return next.run(request).await;
    }

    let Some(token) = bearer_token(request.headers()) else {
        debug!(path = %request.uri().path(), "missing bearer token");
        return ApiError::Unauthorized("missing bearer token".into()).into_response();
    };

    match verifier.verify(token) {
        Ok(caller) => {
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(err) => {
            warn!(path = %request.uri().path(), error = %err, "rejected bearer token");
            ApiError::Unauthorized(err.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(secret: &str, ttl: u64) -> AuthConfig {
        AuthConfig {
            secret: secret.into(),
            token_ttl_secs: ttl,
        }
    }

    #[test]
    fn test_mint_and_verify() {
        let user = Uuid::new_v4();
        let token = mint_token(&auth("s3cret", 60), user, "benchmark").unwrap();

        let caller = TokenVerifier::new("s3cret").verify(&token).unwrap();
        assert_eq!(caller.user_id, user);
        assert_eq!(caller.username, "benchmark");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = mint_token(&auth("one", 60), Uuid::new_v4(), "benchmark").unwrap();
        assert!(matches!(
            TokenVerifier::new("two").verify(&token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(bearer_token(&headers).is_none());

        headers.insert(AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }
}
