//! Requester side of the cut-out: perform a sensitive action only after the
//! daemon reports an explicit human approval.

use async_trait::async_trait;

use crate::errors::ApprovalError;
use crate::ipc::DaemonClient;
use crate::models::approval::ApprovalPayload;

/// The action a human approves, e.g. sending a prepared draft.
#[async_trait]
pub trait SensitiveAction: Send + Sync {
    async fn perform(&self, payload: &ApprovalPayload) -> anyhow::Result<()>;
}

pub async fn send_if_approved<A>(
    client: &DaemonClient,
    payload: &ApprovalPayload,
    action: &A,
) -> Result<(), ApprovalError>
where
    A: SensitiveAction + ?Sized,
{
    client.queue_email(payload).await?;
    tracing::info!(to = %payload.to, draft_id = %payload.draft_id, "approved, performing action");
    action.perform(payload).await.map_err(ApprovalError::Internal)
}
