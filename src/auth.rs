//! Bearer-token authentication for the extraction endpoints.

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, StatusCode},
};
use std::sync::Arc;
use tracing::error;

use crate::error::ApiError;
use crate::supabase::SupabaseClient;

/// Resolves access tokens to user ids.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    /// `Ok(None)` when the token is not a valid session.
    async fn verify(&self, access_token: &str) -> anyhow::Result<Option<String>>;
}

#[async_trait]
impl SessionVerifier for SupabaseClient {
    async fn verify(&self, access_token: &str) -> anyhow::Result<Option<String>> {
        self.authenticate(access_token).await
    }
}

/// The authenticated caller's user id.
///
/// ```ignore
/// async fn handler(AuthUser(user_id): AuthUser) -> impl IntoResponse { .. }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<dyn SessionVerifier>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<dyn SessionVerifier>::from_ref(state);

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        let auth_str = auth_header
            .to_str()
            .map_err(|_| ApiError::unauthorized("Invalid Authorization header"))?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header format"))?;

        match verifier.verify(token).await {
            Ok(Some(user_id)) => Ok(AuthUser(user_id)),
            Ok(None) => Err(ApiError::unauthorized("Invalid or expired session")),
            Err(e) => {
                error!("Session verification failed: {:?}", e);
                Err(ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "AUTH_UNAVAILABLE",
                    "Could not verify the session. Try again later.",
                ))
            }
        }
    }
}
