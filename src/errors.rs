use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("another email is pending approval - only one at a time")]
    Busy,

    #[error("approval timed out")]
    Timeout,

    #[error("rejected by user")]
    Rejected,

    #[error("failed to send notification: {0}")]
    DispatchFailure(String),

    #[error("invalid request")]
    MalformedRequest,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid or expired session")]
    SessionInvalid,

    #[error("approval daemon not running (no socket at {}). Start it with: approval-daemon serve", .0.display())]
    DaemonUnreachable(PathBuf),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApprovalError {
    /// Machine-readable code carried in IPC responses and dashboard errors.
    pub fn code(&self) -> &'static str {
        match self {
            ApprovalError::Busy => "busy",
            ApprovalError::Timeout => "timeout",
            ApprovalError::Rejected => "rejected",
            ApprovalError::DispatchFailure(_) => "dispatch_failed",
            ApprovalError::MalformedRequest => "invalid_request",
            ApprovalError::UnknownAction(_) => "unknown_action",
            ApprovalError::SessionInvalid => "session_invalid",
            ApprovalError::DaemonUnreachable(_) => "daemon_unreachable",
            ApprovalError::Protocol(_) => "protocol_error",
            ApprovalError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApprovalError {
    fn into_response(self) -> Response {
        let (status, error_type, msg) = match &self {
            ApprovalError::SessionInvalid => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "invalid or expired session".to_string(),
            ),
            ApprovalError::Busy => (
                StatusCode::CONFLICT,
                "conflict_error",
                self.to_string(),
            ),
            ApprovalError::Timeout => (
                StatusCode::REQUEST_TIMEOUT,
                "timeout_error",
                self.to_string(),
            ),
            ApprovalError::Rejected => (
                StatusCode::FORBIDDEN,
                "permission_error",
                self.to_string(),
            ),
            ApprovalError::MalformedRequest | ApprovalError::UnknownAction(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                self.to_string(),
            ),
            ApprovalError::DispatchFailure(e) => {
                tracing::warn!("notification dispatch failed: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    self.to_string(),
                )
            }
            ApprovalError::DaemonUnreachable(_) | ApprovalError::Protocol(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable_error",
                self.to_string(),
            ),
            ApprovalError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": self.code(),
            }
        }));

        (status, body).into_response()
    }
}
