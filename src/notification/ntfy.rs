//! ntfy broker client.
//!
//! Publishes approval requests with two HTTP action buttons that post
//! `APPROVE:<token>` / `REJECT:<token>` back to the same topic, and polls the
//! topic for those replies.

use std::borrow::Cow;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::models::approval::{PendingApproval, Verdict};
use crate::notification::Notifier;

pub const DEFAULT_BASE_URL: &str = "https://ntfy.sh";

/// Body preview length in characters before the `...` marker.
pub const PREVIEW_CHARS: usize = 200;

const APPROVE_PREFIX: &str = "APPROVE:";
const REJECT_PREFIX: &str = "REJECT:";

// ── Wire Types ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NtfyAction {
    pub action: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
}

impl NtfyAction {
    fn http_post(label: &str, url: &Url, body: String) -> Self {
        Self {
            action: "http".to_string(),
            label: label.to_string(),
            url: url.to_string(),
            method: "POST".to_string(),
            body,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NtfyMessage {
    pub topic: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<NtfyAction>,
}

/// One record from a poll response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerEvent {
    pub id: String,
    pub time: i64,
    pub event: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub message: String,
}

// ── Client ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct NtfyClient {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl NtfyClient {
    pub fn new(base_url: &str, auth_token: Option<String>) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid ntfy base URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("ntfy base URL cannot carry a topic path: {}", base_url);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("approval-daemon/0.1")
            .build()
            .context("failed to build ntfy HTTP client")?;
        Ok(Self {
            client,
            base_url,
            auth_token,
        })
    }

    /// `<base>/<topic>`, with the topic percent-encoded as one path segment.
    pub fn topic_url(&self, topic: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(topic);
        }
        url
    }

    fn poll_url(&self, topic: &str, since: i64) -> Url {
        let mut url = self.topic_url(topic);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push("json");
        }
        url.query_pairs_mut()
            .append_pair("poll", "1")
            .append_pair("since", &since.to_string());
        url
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    pub async fn send(&self, msg: &NtfyMessage) -> anyhow::Result<()> {
        let resp = self
            .authorize(self.client.post(self.base_url.clone()))
            .json(msg)
            .send()
            .await
            .context("failed to send notification")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("ntfy returned status {}: {}", status, body);
        }
        Ok(())
    }

    /// Plain notification without actions.
    pub async fn send_plain(&self, topic: &str, title: &str, message: &str) -> anyhow::Result<()> {
        self.send(&NtfyMessage {
            topic: topic.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            priority: None,
            tags: Vec::new(),
            actions: Vec::new(),
        })
        .await
    }

    /// Fetch the topic's `message` events published at or after `since`
    /// (unix seconds).
    pub async fn poll(&self, topic: &str, since: i64) -> anyhow::Result<Vec<BrokerEvent>> {
        let resp = self
            .authorize(self.client.get(self.poll_url(topic, since)))
            .send()
            .await
            .context("failed to poll")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("ntfy poll returned status {}: {}", status, body);
        }

        let body = resp
            .text()
            .await
            .context("failed to read poll response")?;
        Ok(parse_poll_body(&body))
    }
}

/// Decode a newline-delimited poll body. Malformed lines and non-message
/// events are dropped.
pub fn parse_poll_body(body: &str) -> Vec<BrokerEvent> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<BrokerEvent>(line) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(error = %e, "skipping malformed broker record");
                None
            }
        })
        .filter(|event| event.event == "message")
        .collect()
}

/// Split a reply body into the claimed verdict and the presented token.
pub fn parse_reply(message: &str) -> Option<(Verdict, &str)> {
    if let Some(token) = message.strip_prefix(APPROVE_PREFIX) {
        Some((Verdict::Approve, token))
    } else {
        message
            .strip_prefix(REJECT_PREFIX)
            .map(|token| (Verdict::Reject, token))
    }
}

fn preview(body: &str) -> Cow<'_, str> {
    match body.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => Cow::Owned(format!("{}...", &body[..cut])),
        None => Cow::Borrowed(body),
    }
}

/// Build the push message for a pending approval.
pub fn approval_message(client: &NtfyClient, topic: &str, approval: &PendingApproval) -> NtfyMessage {
    let reply_url = client.topic_url(topic);
    let payload = &approval.payload;
    NtfyMessage {
        topic: topic.to_string(),
        title: "📧 Approve email?".to_string(),
        message: format!(
            "To: {}\nSubject: {}\n\n{}",
            payload.to,
            payload.subject,
            preview(&payload.body)
        ),
        priority: Some(4),
        tags: vec!["email".to_string(), "outgoing_envelope".to_string()],
        actions: vec![
            NtfyAction::http_post(
                "✓ Approve",
                &reply_url,
                format!("{}{}", APPROVE_PREFIX, approval.approve_token()),
            ),
            NtfyAction::http_post(
                "✗ Reject",
                &reply_url,
                format!("{}{}", REJECT_PREFIX, approval.reject_token()),
            ),
        ],
    }
}

// ── Notifier ──────────────────────────────────────────────────

/// Sends approval requests to one ntfy topic.
#[derive(Clone)]
pub struct NtfyNotifier {
    client: NtfyClient,
    topic: String,
}

impl NtfyNotifier {
    pub fn new(client: NtfyClient, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn send_approval(&self, approval: &PendingApproval) -> anyhow::Result<()> {
        let msg = approval_message(&self.client, &self.topic, approval);
        self.client.send(&msg).await?;
        info!(approval_id = %approval.id, "sent approval notification");
        Ok(())
    }
}
