use std::sync::Arc;

use axum::{
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::models::session::Session;
use crate::queue::ApprovalQueue;

pub mod handlers;
pub mod page;

/// Shared state for the dashboard handlers.
pub struct DashboardState {
    pub queue: Arc<ApprovalQueue>,
    pub session: Arc<Session>,
}

/// Build the dashboard router. Every route is scoped by the session id in
/// its last path segment.
pub fn dashboard_router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/outbox/:session_id", get(handlers::outbox_page))
        .route("/api/pending/:session_id", get(handlers::get_pending))
        .route("/api/approve/:session_id", post(handlers::approve))
        .route("/api/reject/:session_id", post(handlers::reject))
        .route("/api/history/:session_id", get(handlers::get_history))
        .route("/events/:session_id", get(handlers::stream_events))
        .fallback(fallback_404)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(security_headers))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: security headers for the local approval surfaces.
pub(crate) async fn security_headers(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    // Session ids live in URLs; keep them out of caches and referrers.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.remove(header::SERVER);

    resp
}
