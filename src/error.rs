use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::rate_limiter::RateLimitInfo;

#[derive(Debug, Clone, Error)]
pub enum GateError {
    #[error("API key is required")]
    MissingCredential,

    #[error("API key is not recognised")]
    UnknownCredential,

    #[error("Rate limit exceeded")]
    RateLimited(RateLimitInfo),

    #[error("Origin is blocked due to suspicious activity")]
    OriginBlocked,

    #[error("API key is not allowed to access '{0}'")]
    ScopeDenied(String),

    #[error("Task queue is full, try again later")]
    QueueFull,

    #[error("Task not found")]
    TaskNotFound,

    #[error("Task can no longer be cancelled")]
    CancelRejected,

    #[error("Backend memory budget exceeded")]
    ResourceExhausted,

    #[error("Backend failure: {0}")]
    UpstreamFailure(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GateError>;

impl GateError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateError::MissingCredential | GateError::UnknownCredential => StatusCode::UNAUTHORIZED,
            GateError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GateError::OriginBlocked | GateError::ScopeDenied(_) => StatusCode::FORBIDDEN,
            GateError::QueueFull | GateError::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
            GateError::TaskNotFound => StatusCode::NOT_FOUND,
            GateError::CancelRejected => StatusCode::CONFLICT,
            GateError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            GateError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GateError::Configuration(_) | GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable tag used in error bodies and failure counters.
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::MissingCredential => "missing_api_key",
            GateError::UnknownCredential => "invalid_api_key",
            GateError::RateLimited(_) => "rate_limit_exceeded",
            GateError::OriginBlocked => "origin_blocked",
            GateError::ScopeDenied(_) => "forbidden",
            GateError::QueueFull => "queue_full",
            GateError::TaskNotFound => "task_not_found",
            GateError::CancelRejected => "cancel_rejected",
            GateError::ResourceExhausted => "resource_exhausted",
            GateError::UpstreamFailure(_) => "upstream_failure",
            GateError::Validation(_) => "validation_error",
            GateError::Configuration(_) => "configuration_error",
            GateError::Internal(_) => "internal_error",
        }
    }
}

impl From<validator::ValidationErrors> for GateError {
    fn from(err: validator::ValidationErrors) -> Self {
        GateError::Validation(err.to_string())
    }
}

impl From<tokio::task::JoinError> for GateError {
    fn from(err: tokio::task::JoinError) -> Self {
        GateError::Internal(format!("worker task aborted: {}", err))
    }
}

/// Response extension naming the error kind, read back by the instrumentation middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorKind(pub &'static str);

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
            rate_limit: None,
        }
    }

    pub fn from_gate_error(err: &GateError) -> Self {
        let mut body = Self::new(err.kind(), &err.to_string(), err.status_code().as_u16());
        if let GateError::RateLimited(info) = err {
            body.rate_limit = Some(info.clone());
        }
        body
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(ErrorResponse::from_gate_error(&self))).into_response();
        response.extensions_mut().insert(ErrorKind(self.kind()));

        if let GateError::RateLimited(info) = &self {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(info.retry_after_secs()));
            headers.insert("x-ratelimit-limit", HeaderValue::from(info.limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(info.remaining));
        }

        response
    }
}
