//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use approval_daemon::models::approval::{ApprovalPayload, PendingApproval};
use approval_daemon::notification::Notifier;
use approval_daemon::queue::ApprovalQueue;
use async_trait::async_trait;

/// Records every approval it is asked to deliver, so tests can play the
/// human by reading the tokens back.
#[derive(Default)]
pub struct CapturingNotifier {
    sent: Mutex<Vec<PendingApproval>>,
    fail: AtomicBool,
    delay: Duration,
}

impl CapturingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A notifier whose every dispatch takes `delay`.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last(&self) -> PendingApproval {
        self.sent
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no approval was dispatched")
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send_approval(&self, approval: &PendingApproval) -> anyhow::Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("broker unavailable");
        }
        self.sent.lock().unwrap().push(approval.clone());
        Ok(())
    }
}

pub fn payload(to: &str, subject: &str) -> ApprovalPayload {
    ApprovalPayload {
        draft_id: format!("draft-{}", subject),
        to: to.to_string(),
        subject: subject.to_string(),
        body: "Hello there".to_string(),
    }
}

/// Yield until an enqueue has armed the slot.
pub async fn wait_armed(queue: &ApprovalQueue) {
    while queue.snapshot().is_none() {
        tokio::task::yield_now().await;
    }
}
