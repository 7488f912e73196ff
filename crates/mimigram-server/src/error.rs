use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use mimigram_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Empty content or a missing required field.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Not the owner, edit window expired, not the group creator.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing or unknown credential token.
    #[error("Unauthorized: {0}")]
    Auth(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Auth(_) => StatusCode::UNAUTHORIZED,
            ServerError::Store(_) | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::Store(e) => {
                tracing::error!(error = %e, "Storage failure");
                "Storage error".to_string()
            }
            ServerError::Internal(e) => {
                tracing::error!(error = %e, "Internal failure");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = serde_json::json!({
            "success": false,
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
