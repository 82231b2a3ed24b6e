use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::crypto;
use crate::errors::ApprovalError;
use crate::models::approval::{PendingView, Resolution};

/// One resolved approval, as the dashboard viewer saw it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub draft_id: String,
    pub to: String,
    pub subject: String,
    pub outcome: Resolution,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_view(view: &PendingView, outcome: Resolution) -> Self {
        Self {
            draft_id: view.payload.draft_id.clone(),
            to: view.payload.to.clone(),
            subject: view.payload.subject.clone(),
            outcome,
            timestamp: Utc::now(),
        }
    }
}

/// Dashboard session. Knowledge of `id` is the only credential.
pub struct Session {
    id: String,
    pub created_at: DateTime<Utc>,
    history: Mutex<Vec<HistoryEntry>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: crypto::random_urlsafe(32),
            created_at: Utc::now(),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn verify(&self, candidate: &str) -> Result<(), ApprovalError> {
        if crypto::constant_time_eq(&self.id, candidate) {
            Ok(())
        } else {
            Err(ApprovalError::SessionInvalid)
        }
    }

    pub fn record(&self, entry: HistoryEntry) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Newest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.iter().rev().cloned().collect()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
