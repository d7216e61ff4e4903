//! API error handling.
//!
//! Every handler error becomes `{ code, message, details? }` with a status
//! derived from the domain error.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::db::RepositoryError;
use crate::services::access::{AccessError, GateError};
use crate::services::auth::AuthError;
use crate::services::submission::SubmissionError;
use crate::services::validation::ValidationError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "NOT_READY", message)
    }

    pub fn expired(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, "EXPIRED", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let details = match &err {
            ValidationError::UnknownOperation { allowed, .. }
            | ValidationError::UnsupportedFilter { allowed, .. }
            | ValidationError::UnsupportedFormat { allowed, .. } => {
                Some(json!({ "allowed": allowed }))
            }
            ValidationError::FileTooLarge { size, limit } => {
                Some(json!({ "size": size, "limit": limit }))
            }
            ValidationError::QualityOutOfRange {
                quality, allowed, ..
            } => Some(json!({
                "quality": quality,
                "min": allowed.start(),
                "max": allowed.end(),
            })),
            ValidationError::TooManyOperations {
                limit, requested, ..
            } => Some(json!({ "limit": limit, "requested": requested })),
            _ => None,
        };

        let api = ApiError::validation(err.to_string());
        match details {
            Some(details) => api.with_details(details),
            None => api,
        }
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::Forbidden => ApiError::forbidden(err.to_string()),
            AccessError::NotReady(status) => {
                ApiError::not_ready(err.to_string()).with_details(json!({ "status": status }))
            }
            AccessError::Expired(at) => {
                ApiError::expired(err.to_string()).with_details(json!({ "expired_at": at }))
            }
            AccessError::MissingArtifact => {
                tracing::error!("Completed job has no processed artifact");
                ApiError::internal("Processed image unavailable")
            }
        }
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::NotFound(_) => ApiError::not_found(err.to_string()),
            GateError::Access(e) => e.into(),
            GateError::Repository(e) => e.into(),
            GateError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                ApiError::internal("Storage error occurred")
            }
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        tracing::error!("Database error: {}", err);
        ApiError::internal("Database error occurred")
    }
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::Validation(e) => e.into(),
            SubmissionError::Repository(e) => e.into(),
            SubmissionError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                ApiError::internal("Storage error occurred")
            }
            SubmissionError::Queue(e) => {
                tracing::error!("Queue error: {}", e);
                ApiError::internal("Job queue unavailable")
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::unauthorized(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
