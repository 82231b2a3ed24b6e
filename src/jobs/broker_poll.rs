//! Background job: poll the ntfy topic for approve/reject replies.
//!
//! Ticks on a fixed interval but only talks to the broker while an approval
//! is pending. An [`EventCursor`] makes the sequence of broker events
//! resumable, so a reply is handed to the queue at most once.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::notification::ntfy::{parse_reply, BrokerEvent, NtfyClient};
use crate::queue::ApprovalQueue;

/// Monotonic position in a topic's event stream: the newest `time` seen and
/// the ids already consumed at that second.
#[derive(Debug, Clone)]
pub struct EventCursor {
    since: i64,
    seen_at_since: HashSet<String>,
}

impl EventCursor {
    pub fn starting_at(since: i64) -> Self {
        Self {
            since,
            seen_at_since: HashSet::new(),
        }
    }

    pub fn since(&self) -> i64 {
        self.since
    }

    /// Keep only events not consumed before, then move the cursor past them.
    pub fn admit(&mut self, events: Vec<BrokerEvent>) -> Vec<BrokerEvent> {
        let fresh: Vec<BrokerEvent> = events
            .into_iter()
            .filter(|e| {
                e.time > self.since || (e.time == self.since && !self.seen_at_since.contains(&e.id))
            })
            .collect();

        for event in &fresh {
            if event.time > self.since {
                self.since = event.time;
                self.seen_at_since.clear();
            }
            if event.time == self.since {
                self.seen_at_since.insert(event.id.clone());
            }
        }
        fresh
    }
}

/// Spawn the poll loop. Call this once at startup.
pub fn spawn(
    queue: Arc<ApprovalQueue>,
    broker: NtfyClient,
    topic: String,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut cursor = EventCursor::starting_at(chrono::Utc::now().timestamp());
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !queue.is_pending() {
                continue;
            }
            if let Err(e) = poll_once(&queue, &broker, &topic, &mut cursor).await {
                tracing::warn!("poll error: {:#}", e);
            }
        }
    })
}

/// One poll round. Returns how many replies resolved the pending approval.
pub async fn poll_once(
    queue: &ApprovalQueue,
    broker: &NtfyClient,
    topic: &str,
    cursor: &mut EventCursor,
) -> anyhow::Result<usize> {
    let events = broker.poll(topic, cursor.since()).await?;
    let mut resolved = 0;
    for event in cursor.admit(events) {
        let Some((verdict, token)) = parse_reply(&event.message) else {
            continue;
        };
        if queue.resolve(token, verdict) {
            resolved += 1;
        }
    }
    Ok(resolved)
}
