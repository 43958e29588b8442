//! Request-level error for the webhook pipeline.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use crate::compiler::CompileError;
use crate::scm::{ParseError, ScmError, SignatureError};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WebhookError {
    /// Malformed payload, missing repository, or a disallowed event.
    #[error("{0}")]
    Validation(String),

    #[error("unable to verify webhook: {0}")]
    Unauthorized(#[from] SignatureError),

    #[error("{0}")]
    NotFound(String),

    /// Sequencing contention that outlived its retries.
    #[error("{0}")]
    Conflict(String),

    /// Too many pending or running builds for the repository.
    #[error("{0}")]
    BuildLimit(String),

    #[error("{0}")]
    Compile(#[from] CompileError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Provider(#[from] ScmError),

    /// Processing ended without producing a result.
    #[error("{0}")]
    Internal(String),
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::Validation(_) => StatusCode::BAD_REQUEST,
            WebhookError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebhookError::NotFound(_) => StatusCode::NOT_FOUND,
            WebhookError::Conflict(_) => StatusCode::CONFLICT,
            WebhookError::BuildLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            WebhookError::Compile(e) => e.status,
            WebhookError::Store(_) | WebhookError::Provider(_) | WebhookError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ParseError> for WebhookError {
    fn from(err: ParseError) -> Self {
        WebhookError::Validation(format!("unable to parse webhook: {err}"))
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(
            WebhookError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WebhookError::from(SignatureError::Mismatch).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            WebhookError::BuildLimit("full".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            WebhookError::from(StoreError::Unavailable("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let compile = CompileError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: "bad pipeline".into(),
        };
        assert_eq!(
            WebhookError::from(compile).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
