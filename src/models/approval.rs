use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto;

/// How long a pending approval waits for a human before it times out.
pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// What the human is shown. The queue never interprets these fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPayload {
    #[serde(default)]
    pub draft_id: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

/// The two answers a human can give.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approve,
    Reject,
}

/// How a pending approval left the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Approved,
    Rejected,
    #[serde(rename = "timeout")]
    TimedOut,
}

impl From<Verdict> for Resolution {
    fn from(v: Verdict) -> Self {
        match v {
            Verdict::Approve => Resolution::Approved,
            Verdict::Reject => Resolution::Rejected,
        }
    }
}

/// Result of an enqueue call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Approved,
    Rejected,
    TimedOut,
    Busy,
    DispatchFailed(String),
}

impl Outcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, Outcome::Approved)
    }
}

impl From<Resolution> for Outcome {
    fn from(r: Resolution) -> Self {
        match r {
            Resolution::Approved => Outcome::Approved,
            Resolution::Rejected => Outcome::Rejected,
            Resolution::TimedOut => Outcome::TimedOut,
        }
    }
}

/// Single-use secret minted for one pending approval.
#[derive(Clone, PartialEq, Eq)]
pub struct OneTimeToken(String);

impl OneTimeToken {
    pub fn generate() -> Self {
        Self(crypto::random_hex(16))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, candidate: &str) -> bool {
        crypto::constant_time_eq(&self.0, candidate)
    }
}

impl fmt::Debug for OneTimeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OneTimeToken({}…)", &self.0[..4.min(self.0.len())])
    }
}

/// The single in-flight approval request.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub id: Uuid,
    pub payload: ApprovalPayload,
    approve_token: OneTimeToken,
    reject_token: OneTimeToken,
    pub queued_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl PendingApproval {
    pub fn new(payload: ApprovalPayload, timeout: Duration) -> Self {
        let queued_at = Utc::now();
        let deadline = queued_at
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::minutes(5));
        Self {
            id: Uuid::new_v4(),
            payload,
            approve_token: OneTimeToken::generate(),
            reject_token: OneTimeToken::generate(),
            queued_at,
            deadline,
        }
    }

    pub fn approve_token(&self) -> &str {
        self.approve_token.as_str()
    }

    pub fn reject_token(&self) -> &str {
        self.reject_token.as_str()
    }

    /// A token only ever satisfies the verdict it was minted for.
    pub fn accepts(&self, verdict: Verdict, candidate: &str) -> bool {
        match verdict {
            Verdict::Approve => self.approve_token.matches(candidate),
            Verdict::Reject => self.reject_token.matches(candidate),
        }
    }

    /// Token-free view, safe to hand to display surfaces.
    pub fn view(&self) -> PendingView {
        PendingView {
            id: self.id,
            payload: self.payload.clone(),
            queued_at: self.queued_at,
            deadline: self.deadline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingView {
    pub id: Uuid,
    pub payload: ApprovalPayload,
    pub queued_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl PendingView {
    /// Whole seconds until the deadline, never negative.
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.deadline - now).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ApprovalPayload {
        ApprovalPayload {
            draft_id: "r-123".into(),
            to: "a@x.com".into(),
            subject: "S1".into(),
            body: "hello".into(),
        }
    }

    #[test]
    fn test_tokens_are_independent() {
        let p = PendingApproval::new(payload(), APPROVAL_TIMEOUT);
        assert_ne!(p.approve_token(), p.reject_token());
        assert_eq!(p.approve_token().len(), 32);
    }

    #[test]
    fn test_token_only_accepts_its_own_verdict() {
        let p = PendingApproval::new(payload(), APPROVAL_TIMEOUT);
        let approve = p.approve_token().to_string();
        let reject = p.reject_token().to_string();
        assert!(p.accepts(Verdict::Approve, &approve));
        assert!(p.accepts(Verdict::Reject, &reject));
        assert!(!p.accepts(Verdict::Approve, &reject));
        assert!(!p.accepts(Verdict::Reject, &approve));
    }

    #[test]
    fn test_no_prefix_matching() {
        let p = PendingApproval::new(payload(), APPROVAL_TIMEOUT);
        let approve = p.approve_token();
        assert!(!p.accepts(Verdict::Approve, &approve[..16]));
        assert!(!p.accepts(Verdict::Approve, &format!("{approve}0")));
        assert!(!p.accepts(Verdict::Approve, ""));
    }

    #[test]
    fn test_deadline_is_queued_at_plus_timeout() {
        let p = PendingApproval::new(payload(), APPROVAL_TIMEOUT);
        assert_eq!((p.deadline - p.queued_at).num_seconds(), 300);
        assert_eq!(p.view().expires_in(p.queued_at), 300);
        assert_eq!(p.view().expires_in(p.deadline + chrono::Duration::seconds(9)), 0);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let p = PendingApproval::new(payload(), APPROVAL_TIMEOUT);
        let dbg = format!("{:?}", p);
        assert!(!dbg.contains(p.approve_token()));
        assert!(!dbg.contains(p.reject_token()));
    }

    #[test]
    fn test_resolution_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Resolution::Approved).unwrap(), "approved");
        assert_eq!(serde_json::to_value(Resolution::TimedOut).unwrap(), "timeout");
    }
}
