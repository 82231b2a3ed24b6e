//! Background job: append every resolved approval to the dashboard session
//! history, whichever front-end resolved it.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::models::session::{HistoryEntry, Session};
use crate::queue::{ApprovalQueue, QueueEvent};

pub fn spawn(queue: &ApprovalQueue, session: Arc<Session>) -> JoinHandle<()> {
    let mut events = queue.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(QueueEvent::Resolved {
                    approval,
                    resolution,
                }) => session.record(HistoryEntry::from_view(&approval, resolution)),
                Ok(QueueEvent::Queued(_)) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("history recorder lagged, dropped {} events", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
