//! Token authentication for REST handlers.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use mimigram_store::User;

use crate::accounts::authenticate_token;
use crate::api::AppState;
use crate::error::ServerError;

/// The caller, resolved from the `Authorization` header. Accepts the bare
/// token or `Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// Pull the token out of an `Authorization` value.
pub fn bearer_token(header: &str) -> &str {
    let header = header.trim();
    header.strip_prefix("Bearer ").unwrap_or(header).trim()
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let user = authenticate_token(&state.store, bearer_token(header))?;
        Ok(AuthUser(user))
    }
}
