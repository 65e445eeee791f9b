use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use quotegate_core::OperationError;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("{message}")]
    TooManyRequests { message: String, retry_after_secs: u64 },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Operation(e) => match e {
                OperationError::NotFound(_) => StatusCode::NOT_FOUND,
                OperationError::BadInput(_) => StatusCode::BAD_REQUEST,
                OperationError::Upstream(_)
                | OperationError::Network(_)
                | OperationError::Parse(_) => StatusCode::BAD_GATEWAY,
                OperationError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Operation(e) => match e {
                OperationError::NotFound(_) => "not_found",
                OperationError::BadInput(_) => "bad_input",
                OperationError::Upstream(_) => "upstream_error",
                OperationError::Network(_) => "upstream_unreachable",
                OperationError::Parse(_) => "upstream_parse_error",
                OperationError::Serialization(_) => "serialization_error",
            },
            Self::TooManyRequests { .. } => "rate_limit_exceeded",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else if status == StatusCode::BAD_GATEWAY {
            tracing::warn!(error = %self, "upstream unavailable");
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        match self {
            Self::TooManyRequests {
                retry_after_secs, ..
            } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.max(1).to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}
