pub mod ntfy;

use async_trait::async_trait;

use crate::models::approval::PendingApproval;

/// Delivers an approval request to the human. Implementations must embed the
/// pending approval's one-time tokens in whatever reply surface they offer.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_approval(&self, approval: &PendingApproval) -> anyhow::Result<()>;
}
