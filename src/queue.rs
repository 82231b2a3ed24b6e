//! Single-slot approval queue.
//!
//! At most one approval is in flight. `enqueue` reserves the slot, dispatches
//! the notification without holding the lock, arms the slot with a oneshot
//! result channel and then parks the caller until a human verdict arrives or
//! the timeout fires. Every path out of `Pending` (token, dashboard, timeout,
//! a dropped caller) goes through [`ApprovalQueue::retire`], which empties the
//! slot and writes the result channel in the same critical section.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::approval::{
    ApprovalPayload, Outcome, PendingApproval, PendingView, Resolution, Verdict, APPROVAL_TIMEOUT,
};
use crate::notification::Notifier;

/// Transition notices for listeners (dashboard viewers, history).
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Queued(PendingView),
    Resolved {
        approval: PendingView,
        resolution: Resolution,
    },
}

struct Armed {
    approval: PendingApproval,
    result_tx: oneshot::Sender<Resolution>,
}

enum Slot {
    Idle,
    /// Claimed by an enqueue whose notification is still in flight.
    Reserved(Uuid),
    Armed(Armed),
}

/// Held by an in-flight `enqueue`. A finished enqueue has already emptied
/// the slot, so this only acts when the future is dropped early.
struct SlotClaim<'a> {
    queue: &'a ApprovalQueue,
    id: Uuid,
}

impl Drop for SlotClaim<'_> {
    fn drop(&mut self) {
        self.queue.abandon(self.id);
    }
}

pub struct ApprovalQueue {
    slot: Mutex<Slot>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    events: broadcast::Sender<QueueEvent>,
}

impl ApprovalQueue {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self::with_timeout(notifier, APPROVAL_TIMEOUT)
    }

    pub fn with_timeout(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            slot: Mutex::new(Slot::Idle),
            notifier,
            timeout,
            events,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: QueueEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Queue `payload` for human approval and wait for the verdict.
    ///
    /// The deadline runs from the moment the slot is claimed, so time spent
    /// dispatching the notification counts against it. Dropping the returned
    /// future frees the slot.
    pub async fn enqueue(&self, payload: ApprovalPayload) -> Outcome {
        let approval = {
            let mut slot = self.lock_slot();
            if !matches!(*slot, Slot::Idle) {
                debug!(to = %payload.to, "rejecting enqueue: an approval is already pending");
                return Outcome::Busy;
            }
            let approval = PendingApproval::new(payload, self.timeout);
            *slot = Slot::Reserved(approval.id);
            approval
        };
        let id = approval.id;
        let deadline = Instant::now() + self.timeout;
        let _claim = SlotClaim { queue: self, id };

        if let Err(e) = self.notifier.send_approval(&approval).await {
            warn!(approval_id = %id, error = %e, "notification dispatch failed, approval retracted");
            return Outcome::DispatchFailed(format!("{:#}", e));
        }

        let (result_tx, mut result_rx) = oneshot::channel();
        let view = approval.view();
        {
            let mut slot = self.lock_slot();
            *slot = Slot::Armed(Armed {
                approval,
                result_tx,
            });
        }
        info!(
            approval_id = %id,
            to = %view.payload.to,
            subject = %view.payload.subject,
            "email queued for approval"
        );
        self.publish(QueueEvent::Queued(view));

        let resolution = match tokio::time::timeout_at(deadline, &mut result_rx).await {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_)) => {
                warn!(approval_id = %id, "result channel dropped without a verdict");
                Resolution::TimedOut
            }
            Err(_) => self.expire(id, &mut result_rx),
        };
        resolution.into()
    }

    /// Free the slot if it still belongs to `id`: a reservation is
    /// released quietly, an armed approval is retired as timed out.
    fn abandon(&self, id: Uuid) {
        let mut slot = self.lock_slot();
        if matches!(&*slot, Slot::Reserved(reserved) if *reserved == id) {
            *slot = Slot::Idle;
            debug!(approval_id = %id, "reservation released");
            return;
        }
        if !matches!(&*slot, Slot::Armed(armed) if armed.approval.id == id) {
            return;
        }
        if let Some(view) = self.retire(&mut slot, Resolution::TimedOut) {
            info!(approval_id = %view.id, "requester went away, approval withdrawn");
        }
    }

    /// Deadline elapsed. A verdict that raced the timer wins if it was
    /// already written.
    fn expire(&self, id: Uuid, result_rx: &mut oneshot::Receiver<Resolution>) -> Resolution {
        let mut slot = self.lock_slot();
        let ours = matches!(&*slot, Slot::Armed(armed) if armed.approval.id == id);
        if ours {
            if let Some(view) = self.retire(&mut slot, Resolution::TimedOut) {
                info!(approval_id = %view.id, "approval timed out");
            }
            return Resolution::TimedOut;
        }
        result_rx.try_recv().unwrap_or(Resolution::TimedOut)
    }

    /// Empty the slot and deliver `resolution` to the blocked caller.
    /// Caller holds the slot lock.
    fn retire(&self, slot: &mut Slot, resolution: Resolution) -> Option<PendingView> {
        let armed = match std::mem::replace(slot, Slot::Idle) {
            Slot::Armed(armed) => armed,
            other => {
                *slot = other;
                return None;
            }
        };
        let view = armed.approval.view();
        if armed.result_tx.send(resolution).is_err() {
            debug!(approval_id = %view.id, "waiter already gone");
        }
        self.publish(QueueEvent::Resolved {
            approval: view.clone(),
            resolution,
        });
        Some(view)
    }

    /// Resolve the pending approval with a one-time token. Anything that
    /// does not exactly match the current token for `verdict` is ignored.
    pub fn resolve(&self, token: &str, verdict: Verdict) -> bool {
        let mut slot = self.lock_slot();
        let matched = matches!(&*slot, Slot::Armed(armed) if armed.approval.accepts(verdict, token));
        if !matched {
            debug!(?verdict, "ignoring token that matches no pending approval");
            return false;
        }
        match self.retire(&mut slot, verdict.into()) {
            Some(view) => {
                info!(approval_id = %view.id, ?verdict, "approval resolved by token");
                true
            }
            None => false,
        }
    }

    /// Resolve whatever is currently pending. Used by front-ends that
    /// authorize the human by other means than a token.
    pub fn decide(&self, verdict: Verdict) -> Option<PendingView> {
        let mut slot = self.lock_slot();
        let view = self.retire(&mut slot, verdict.into())?;
        info!(approval_id = %view.id, ?verdict, "approval decided on dashboard");
        Some(view)
    }

    /// The armed approval, if any.
    pub fn snapshot(&self) -> Option<PendingView> {
        match &*self.lock_slot() {
            Slot::Armed(armed) => Some(armed.approval.view()),
            _ => None,
        }
    }

    /// Non-blocking check used by the poll loop. Contention reads as
    /// "nothing to do this tick".
    pub fn is_pending(&self) -> bool {
        match self.slot.try_lock() {
            Ok(slot) => matches!(*slot, Slot::Armed(_)),
            Err(TryLockError::Poisoned(poisoned)) => {
                matches!(*poisoned.into_inner(), Slot::Armed(_))
            }
            Err(TryLockError::WouldBlock) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct CapturingNotifier {
        sent: Mutex<Vec<PendingApproval>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Notifier for CapturingNotifier {
        async fn send_approval(&self, approval: &PendingApproval) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("broker unavailable");
            }
            self.sent.lock().unwrap().push(approval.clone());
            Ok(())
        }
    }

    impl CapturingNotifier {
        fn last(&self) -> PendingApproval {
            self.sent.lock().unwrap().last().cloned().unwrap()
        }
    }

    fn payload(to: &str) -> ApprovalPayload {
        ApprovalPayload {
            to: to.into(),
            subject: "S1".into(),
            ..Default::default()
        }
    }

    async fn wait_armed(queue: &ApprovalQueue) {
        while queue.snapshot().is_none() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_decide_with_nothing_pending_is_none() {
        let queue = ApprovalQueue::new(Arc::new(CapturingNotifier::default()));
        assert!(queue.decide(Verdict::Approve).is_none());
        assert!(!queue.is_pending());
    }

    #[tokio::test]
    async fn test_decide_resolves_current_approval() {
        let notifier = Arc::new(CapturingNotifier::default());
        let queue = Arc::new(ApprovalQueue::new(notifier.clone()));

        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.enqueue(payload("a@x.com")).await });
        wait_armed(&queue).await;
        assert!(queue.is_pending());

        let view = queue.decide(Verdict::Reject).unwrap();
        assert_eq!(view.payload.to, "a@x.com");
        assert_eq!(waiter.await.unwrap(), Outcome::Rejected);
        assert!(queue.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_events_follow_transitions() {
        let notifier = Arc::new(CapturingNotifier::default());
        let queue = Arc::new(ApprovalQueue::new(notifier.clone()));
        let mut events = queue.subscribe();

        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.enqueue(payload("a@x.com")).await });
        wait_armed(&queue).await;
        let token = notifier.last().approve_token().to_string();
        assert!(queue.resolve(&token, Verdict::Approve));
        assert_eq!(waiter.await.unwrap(), Outcome::Approved);

        assert!(matches!(events.recv().await.unwrap(), QueueEvent::Queued(_)));
        match events.recv().await.unwrap() {
            QueueEvent::Resolved { resolution, .. } => assert_eq!(resolution, Resolution::Approved),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_failure_publishes_nothing() {
        let notifier = Arc::new(CapturingNotifier::default());
        notifier.fail.store(true, Ordering::SeqCst);
        let queue = ApprovalQueue::new(notifier.clone());
        let mut events = queue.subscribe();

        let outcome = queue.enqueue(payload("a@x.com")).await;
        assert!(matches!(outcome, Outcome::DispatchFailed(ref msg) if msg.contains("broker unavailable")));
        assert!(events.try_recv().is_err());
    }
}
