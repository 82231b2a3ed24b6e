//! Newline-delimited JSON protocol spoken over the daemon socket.

use serde::{Deserialize, Serialize};

use crate::errors::ApprovalError;
use crate::models::approval::{ApprovalPayload, Outcome};

pub const ACTION_QUEUE_EMAIL: &str = "queue_email";
pub const ACTION_STATUS: &str = "status";

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_APPROVED: &str = "approved";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcRequest {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<String>,
}

impl IpcRequest {
    pub fn status() -> Self {
        Self {
            action: ACTION_STATUS.to_string(),
            ..Default::default()
        }
    }

    pub fn queue_email(payload: &ApprovalPayload) -> Self {
        Self {
            action: ACTION_QUEUE_EMAIL.to_string(),
            to: Some(payload.to.clone()),
            subject: Some(payload.subject.clone()),
            body: Some(payload.body.clone()),
            draft_id: Some(payload.draft_id.clone()),
        }
    }
}

/// A decoded request the daemon knows how to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    QueueEmail(ApprovalPayload),
    Status,
}

impl TryFrom<IpcRequest> for Action {
    type Error = ApprovalError;

    fn try_from(req: IpcRequest) -> Result<Self, Self::Error> {
        match req.action.as_str() {
            ACTION_QUEUE_EMAIL => Ok(Action::QueueEmail(ApprovalPayload {
                draft_id: req.draft_id.unwrap_or_default(),
                to: req.to.unwrap_or_default(),
                subject: req.subject.unwrap_or_default(),
                body: req.body.unwrap_or_default(),
            })),
            ACTION_STATUS => Ok(Action::Status),
            _ => Err(ApprovalError::UnknownAction(req.action)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable result code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl IpcResponse {
    pub fn running() -> Self {
        Self {
            success: true,
            error: None,
            status: Some(STATUS_RUNNING.to_string()),
        }
    }

    pub fn from_error(err: &ApprovalError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            status: Some(err.code().to_string()),
        }
    }

    pub fn from_outcome(outcome: &Outcome) -> Self {
        let err = match outcome {
            Outcome::Approved => {
                return Self {
                    success: true,
                    error: None,
                    status: Some(STATUS_APPROVED.to_string()),
                }
            }
            Outcome::Rejected => ApprovalError::Rejected,
            Outcome::TimedOut => ApprovalError::Timeout,
            Outcome::Busy => ApprovalError::Busy,
            Outcome::DispatchFailed(reason) => ApprovalError::DispatchFailure(reason.clone()),
        };
        Self::from_error(&err)
    }

    /// Client-side decoding of a `queue_email` reply. Only an explicit
    /// approval is `Ok`.
    pub fn into_approval(self) -> Result<(), ApprovalError> {
        if self.success {
            return match self.status.as_deref() {
                Some(STATUS_APPROVED) => Ok(()),
                other => Err(ApprovalError::Protocol(format!(
                    "unexpected status {:?} for an approval request",
                    other
                ))),
            };
        }

        let message = self.error.unwrap_or_else(|| "no error message".to_string());
        Err(match self.status.as_deref() {
            Some("rejected") => ApprovalError::Rejected,
            Some("timeout") => ApprovalError::Timeout,
            Some("busy") => ApprovalError::Busy,
            Some("dispatch_failed") => ApprovalError::DispatchFailure(
                message
                    .strip_prefix("failed to send notification: ")
                    .unwrap_or(&message)
                    .to_string(),
            ),
            Some("invalid_request") => ApprovalError::MalformedRequest,
            Some("unknown_action") => ApprovalError::UnknownAction(
                message
                    .strip_prefix("unknown action: ")
                    .unwrap_or(&message)
                    .to_string(),
            ),
            _ => ApprovalError::Protocol(message),
        })
    }
}
