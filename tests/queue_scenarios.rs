//! End-to-end behaviour of the single-slot approval queue: one approval at
//! a time, one-time tokens, timeouts and dispatch failures.

mod common;

use std::sync::Arc;
use std::time::Duration;

use approval_daemon::models::approval::{Outcome, Resolution, Verdict, APPROVAL_TIMEOUT};
use approval_daemon::queue::{ApprovalQueue, QueueEvent};
use common::{payload, wait_armed, CapturingNotifier};
use tokio_test::{assert_pending, assert_ready_eq, task};

mod exclusivity {
    use super::*;

    #[tokio::test]
    async fn test_second_enqueue_is_busy_without_waiting() {
        let notifier = CapturingNotifier::new();
        let queue = ApprovalQueue::new(notifier.clone());

        let mut first = task::spawn(queue.enqueue(payload("a@x.com", "S1")));
        assert_pending!(first.poll());
        assert!(queue.is_pending());

        // Completes on its first poll: the caller is never parked.
        let mut second = task::spawn(queue.enqueue(payload("b@x.com", "S2")));
        assert_ready_eq!(second.poll(), Outcome::Busy);
        assert_eq!(notifier.sent_count(), 1);
        assert_eq!(queue.snapshot().unwrap().payload.to, "a@x.com");

        assert!(queue.resolve(notifier.last().approve_token(), Verdict::Approve));
        assert!(first.is_woken());
        assert_ready_eq!(first.poll(), Outcome::Approved);
    }
}

mod tokens {
    use super::*;

    #[tokio::test]
    async fn test_approve_token_unblocks_caller() {
        let notifier = CapturingNotifier::new();
        let queue = Arc::new(ApprovalQueue::new(notifier.clone()));

        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.enqueue(payload("a@x.com", "S1")).await });
        wait_armed(&queue).await;

        assert!(queue.resolve(notifier.last().approve_token(), Verdict::Approve));
        assert_eq!(waiter.await.unwrap(), Outcome::Approved);
        assert!(queue.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_reject_token_unblocks_caller() {
        let notifier = CapturingNotifier::new();
        let queue = Arc::new(ApprovalQueue::new(notifier.clone()));

        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.enqueue(payload("a@x.com", "S1")).await });
        wait_armed(&queue).await;

        assert!(queue.resolve(notifier.last().reject_token(), Verdict::Reject));
        assert_eq!(waiter.await.unwrap(), Outcome::Rejected);
    }

    #[tokio::test]
    async fn test_wrong_or_crossed_tokens_are_ignored() {
        let notifier = CapturingNotifier::new();
        let queue = Arc::new(ApprovalQueue::new(notifier.clone()));

        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.enqueue(payload("a@x.com", "S1")).await });
        wait_armed(&queue).await;
        let approval = notifier.last();

        assert!(!queue.resolve("not-a-token", Verdict::Approve));
        assert!(!queue.resolve("", Verdict::Reject));
        // The reject token cannot approve, and vice versa.
        assert!(!queue.resolve(approval.reject_token(), Verdict::Approve));
        assert!(!queue.resolve(approval.approve_token(), Verdict::Reject));
        assert!(queue.is_pending());

        assert!(queue.resolve(approval.reject_token(), Verdict::Reject));
        assert_eq!(waiter.await.unwrap(), Outcome::Rejected);
    }

    #[tokio::test]
    async fn test_tokens_do_not_survive_their_approval() {
        let notifier = CapturingNotifier::new();
        let queue = Arc::new(ApprovalQueue::new(notifier.clone()));

        let q = queue.clone();
        let first = tokio::spawn(async move { q.enqueue(payload("a@x.com", "S1")).await });
        wait_armed(&queue).await;
        let old = notifier.last();
        assert!(queue.resolve(old.approve_token(), Verdict::Approve));
        assert_eq!(first.await.unwrap(), Outcome::Approved);

        // Resolving a retired slot is a no-op.
        assert!(!queue.resolve(old.approve_token(), Verdict::Approve));

        let q = queue.clone();
        let second = tokio::spawn(async move { q.enqueue(payload("b@x.com", "S2")).await });
        wait_armed(&queue).await;
        let current = notifier.last();
        assert_ne!(old.id, current.id);

        // Replaying the previous instance's tokens has no effect.
        assert!(!queue.resolve(old.approve_token(), Verdict::Approve));
        assert!(!queue.resolve(old.reject_token(), Verdict::Reject));
        assert!(queue.is_pending());

        assert!(queue.resolve(current.reject_token(), Verdict::Reject));
        assert_eq!(second.await.unwrap(), Outcome::Rejected);
    }
}

mod timeouts {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_approval_times_out_and_frees_slot() {
        let notifier = CapturingNotifier::new();
        let queue = Arc::new(ApprovalQueue::new(notifier.clone()));

        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.enqueue(payload("a@x.com", "S1")).await });
        wait_armed(&queue).await;
        let expired = notifier.last();

        tokio::time::advance(APPROVAL_TIMEOUT - Duration::from_secs(1)).await;
        assert!(queue.is_pending());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(waiter.await.unwrap(), Outcome::TimedOut);
        assert!(queue.snapshot().is_none());

        // Tokens of the expired approval are dead.
        assert!(!queue.resolve(expired.approve_token(), Verdict::Approve));

        let q = queue.clone();
        let next = tokio::spawn(async move { q.enqueue(payload("b@x.com", "S2")).await });
        wait_armed(&queue).await;
        assert!(queue.resolve(notifier.last().approve_token(), Verdict::Approve));
        assert_eq!(next.await.unwrap(), Outcome::Approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_timeout_is_honoured() {
        let notifier = CapturingNotifier::new();
        let queue = ApprovalQueue::with_timeout(notifier.clone(), Duration::from_secs(5));
        assert_eq!(queue.timeout(), Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        assert_eq!(queue.enqueue(payload("a@x.com", "S1")).await, Outcome::TimedOut);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_time_counts_against_deadline() {
        let notifier = CapturingNotifier::slow(Duration::from_secs(3));
        let queue = ApprovalQueue::with_timeout(notifier.clone(), Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        assert_eq!(queue.enqueue(payload("a@x.com", "S1")).await, Outcome::TimedOut);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6), "{:?}", waited);

        let sent = notifier.last();
        assert_eq!((sent.deadline - sent.queued_at).num_seconds(), 5);
    }
}

mod cancellation {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_dispatch_frees_slot() {
        let notifier = CapturingNotifier::slow(Duration::from_secs(1));
        let queue = Arc::new(ApprovalQueue::with_timeout(notifier.clone(), Duration::from_secs(5)));

        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.enqueue(payload("a@x.com", "S1")).await });
        tokio::time::sleep(Duration::from_millis(500)).await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        // The next enqueue claims the slot and waits on its own dispatch.
        let mut next = task::spawn(queue.enqueue(payload("b@x.com", "S2")));
        assert_pending!(next.poll());
        assert_eq!(notifier.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_wait_retires_approval() {
        let notifier = CapturingNotifier::new();
        let queue = Arc::new(ApprovalQueue::new(notifier.clone()));
        let mut events = queue.subscribe();

        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.enqueue(payload("a@x.com", "S1")).await });
        wait_armed(&queue).await;
        let abandoned = notifier.last();
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        assert!(queue.snapshot().is_none());
        assert!(!queue.resolve(abandoned.approve_token(), Verdict::Approve));
        assert!(matches!(events.recv().await.unwrap(), QueueEvent::Queued(_)));
        match events.recv().await.unwrap() {
            QueueEvent::Resolved { resolution, approval } => {
                assert_eq!(resolution, Resolution::TimedOut);
                assert_eq!(approval.id, abandoned.id);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let q = queue.clone();
        let next = tokio::spawn(async move { q.enqueue(payload("b@x.com", "S2")).await });
        wait_armed(&queue).await;
        assert!(queue.resolve(notifier.last().approve_token(), Verdict::Approve));
        assert_eq!(next.await.unwrap(), Outcome::Approved);
    }
}

mod dispatch {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_failure_leaves_slot_empty() {
        let notifier = CapturingNotifier::new();
        notifier.set_failing(true);
        let queue = Arc::new(ApprovalQueue::new(notifier.clone()));

        match queue.enqueue(payload("a@x.com", "S1")).await {
            Outcome::DispatchFailed(reason) => assert!(reason.contains("broker unavailable")),
            other => panic!("expected dispatch failure, got {:?}", other),
        }
        assert!(queue.snapshot().is_none());
        assert!(!queue.is_pending());

        notifier.set_failing(false);
        let q = queue.clone();
        let next = tokio::spawn(async move { q.enqueue(payload("b@x.com", "S2")).await });
        wait_armed(&queue).await;
        assert!(queue.resolve(notifier.last().approve_token(), Verdict::Approve));
        assert_eq!(next.await.unwrap(), Outcome::Approved);
    }
}
