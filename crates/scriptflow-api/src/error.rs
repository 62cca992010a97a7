use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scriptflow_ai::AiError;
use scriptflow_core::{CoreError, JobId, ProjectId};
use scriptflow_queue::QueueError;
use scriptflow_workflow::WorkflowError;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

use crate::response::meta;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("{0}")]
    Conflict(String),

    #[error("Project {0} has no revision decisions")]
    NoDecisions(ProjectId),

    #[error("{0}")]
    InvalidPhase(String),

    #[error("{0}")]
    InvalidJobType(String),

    #[error("Too many requests, please retry in {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

/// Marks responses built from an internal error so the redaction layer can find them.
#[derive(Debug, Clone, Copy)]
pub struct InternalErrorMarker;

pub const REDACTED_MESSAGE: &str = "Internal Server Error";

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. }
            | ApiError::NoDecisions(_)
            | ApiError::InvalidPhase(_)
            | ApiError::InvalidJobType(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) | ApiError::ProjectNotFound(_) | ApiError::JobNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::ProjectNotFound(_) => "PROJECT_NOT_FOUND",
            ApiError::JobNotFound(_) => "JOB_NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::NoDecisions(_) => "NO_DECISIONS",
            ApiError::InvalidPhase(_) => "INVALID_PHASE",
            ApiError::InvalidJobType(_) => "INVALID_JOB_TYPE",
            ApiError::RateLimited { .. } => "RATE_LIMIT",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::Validation { details, .. } => details.clone(),
            ApiError::RateLimited { retry_after } => Some(json!({ "retryAfter": retry_after })),
            _ => None,
        }
    }
}

/// Error envelope with the given code and message.
pub fn error_body(code: &str, message: &str, details: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message });
    if let Some(details) = details {
        error["details"] = details;
    }
    json!({
        "success": false,
        "error": error,
        "meta": meta(),
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), "{}", self);
        }
        let body = error_body(self.code(), &self.to_string(), self.details());
        let mut response = (status, Json(body)).into_response();
        if matches!(self, ApiError::Internal(_)) {
            response.extensions_mut().insert(InternalErrorMarker);
        }
        response
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::ProjectNotFound(id) => ApiError::ProjectNotFound(id),
            WorkflowError::Forbidden => ApiError::Forbidden(err.to_string()),
            WorkflowError::NoDecisions(id) => ApiError::NoDecisions(id),
            WorkflowError::InvalidPhase { .. } => ApiError::InvalidPhase(err.to_string()),
            WorkflowError::InvalidJobType { .. } => ApiError::InvalidJobType(err.to_string()),
            WorkflowError::JobNotFound(id) => ApiError::JobNotFound(id),
            WorkflowError::Validation(message) => ApiError::validation(message),
            WorkflowError::Payload(e) => ApiError::Internal(format!("Malformed job payload: {}", e)),
            WorkflowError::Ai(e) => e.into(),
            WorkflowError::Storage(e) => e.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ProjectNotFound(id) => ApiError::ProjectNotFound(id),
            CoreError::DuplicateUser(_) => ApiError::Conflict(err.to_string()),
            CoreError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AiError> for ApiError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::Conversion { code, message } => ApiError::Validation {
                message,
                details: Some(json!({ "conversionCode": code })),
            },
            e if e.is_unavailable() => ApiError::ServiceUnavailable(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::JobNotFound(id) => ApiError::JobNotFound(id),
            other => ApiError::Conflict(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}
