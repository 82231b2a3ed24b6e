use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html,
    },
    Json,
};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;

use crate::api::{page, DashboardState};
use crate::errors::ApprovalError;
use crate::models::approval::Verdict;
use crate::models::session::HistoryEntry;

// ── Page ─────────────────────────────────────────────────────

/// GET /outbox/:session_id: the review page
pub async fn outbox_page(
    State(state): State<Arc<DashboardState>>,
    Path(session_id): Path<String>,
) -> Result<Html<String>, ApprovalError> {
    state.session.verify(&session_id)?;
    Ok(Html(page::render_dashboard(state.session.id())))
}

// ── Pending / Decisions ──────────────────────────────────────

/// GET /api/pending/:session_id: current approval or `{pending:false}`
pub async fn get_pending(
    State(state): State<Arc<DashboardState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApprovalError> {
    state.session.verify(&session_id)?;

    let Some(view) = state.queue.snapshot() else {
        return Ok(Json(json!({ "pending": false })));
    };

    Ok(Json(json!({
        "pending": true,
        "id": view.id,
        "draftId": view.payload.draft_id,
        "to": view.payload.to,
        "subject": view.payload.subject,
        "body": view.payload.body,
        "queuedAt": view.queued_at.to_rfc3339(),
        "expiresIn": view.expires_in(chrono::Utc::now()),
    })))
}

/// POST /api/approve/:session_id
pub async fn approve(
    State(state): State<Arc<DashboardState>>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApprovalError> {
    decide(&state, &session_id, Verdict::Approve)
}

/// POST /api/reject/:session_id
pub async fn reject(
    State(state): State<Arc<DashboardState>>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApprovalError> {
    decide(&state, &session_id, Verdict::Reject)
}

fn decide(
    state: &DashboardState,
    session_id: &str,
    verdict: Verdict,
) -> Result<(StatusCode, Json<Value>), ApprovalError> {
    state.session.verify(session_id)?;

    match state.queue.decide(verdict) {
        Some(view) => {
            let message = match verdict {
                Verdict::Approve => "Email approved",
                Verdict::Reject => "Email rejected",
            };
            Ok((
                StatusCode::OK,
                Json(json!({ "success": true, "message": message, "id": view.id })),
            ))
        }
        None => Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "no email pending approval" })),
        )),
    }
}

/// GET /api/history/:session_id: resolved approvals, newest first
pub async fn get_history(
    State(state): State<Arc<DashboardState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, ApprovalError> {
    state.session.verify(&session_id)?;
    Ok(Json(state.session.history()))
}

// ── Live Updates (SSE) ───────────────────────────────────────

/// GET /events/:session_id: `connected` once, then `update` on every
/// queue transition. Viewers refetch `/api/pending` on each event.
pub async fn stream_events(
    State(state): State<Arc<DashboardState>>,
    Path(session_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApprovalError> {
    state.session.verify(&session_id)?;

    let events = state.queue.subscribe();
    let connected = stream::once(async { Ok::<_, Infallible>(Event::default().data("connected")) });
    let updates = stream::unfold(events, |mut events| async move {
        match events.recv().await {
            // A lagged viewer still only needs to know that something changed.
            Ok(_) | Err(RecvError::Lagged(_)) => {
                Some((Ok::<_, Infallible>(Event::default().data("update")), events))
            }
            Err(RecvError::Closed) => None,
        }
    });

    Ok(Sse::new(connected.chain(updates)).keep_alive(KeepAlive::default()))
}
