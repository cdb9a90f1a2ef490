//! HTTP error mapping for core results.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::error::Error;
use crate::storage::StorageError;

/// One rejected request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request input rejected before reaching the core.
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error(transparent)]
    Core(#[from] Error),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FieldError>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, errors) = match self {
            Self::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation failed".to_string(),
                Some(errors),
            ),
            Self::Core(Error::Validation(msg)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation failed".to_string(),
                Some(vec![FieldError::new("request", msg)]),
            ),
            Self::Core(Error::NotInitialized { tenant }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Tenant '{tenant}' is not initialized"),
                None,
            ),
            Self::Core(Error::Storage(StorageError::Saturated)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service is busy, please retry".to_string(),
                None,
            ),
            Self::Core(Error::Storage(err)) => {
                error!(error = %err, "storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                    None,
                )
            }
            Self::Core(Error::Configuration(msg)) => {
                error!(error = %msg, "configuration error while serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        (status, Json(ErrorResponse { message, errors })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
