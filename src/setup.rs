//! First-run setup: a short-lived local web page that shows the private
//! topic, sends a test push and marks the bootstrap config complete.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use qrcode::render::svg;
use qrcode::QrCode;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::security_headers;
use crate::notification::ntfy::NtfyClient;
use crate::store::bootstrap::{self, BootstrapConfig};

const TEST_TITLE: &str = "Test Notification";
const TEST_MESSAGE: &str = "If you see this, setup is working!";

pub struct SetupState {
    client: NtfyClient,
    config: Mutex<BootstrapConfig>,
    path: PathBuf,
    done: Mutex<Option<oneshot::Sender<()>>>,
}

impl SetupState {
    /// Returns the state plus a receiver that fires once `/complete` has
    /// persisted the config.
    pub fn new(
        client: NtfyClient,
        config: BootstrapConfig,
        path: PathBuf,
    ) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (done_tx, done_rx) = oneshot::channel();
        let state = Arc::new(Self {
            client,
            config: Mutex::new(config),
            path,
            done: Mutex::new(Some(done_tx)),
        });
        (state, done_rx)
    }

    pub fn config(&self) -> BootstrapConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn topic(&self) -> String {
        self.config().ntfy_topic
    }
}

pub fn setup_router(state: Arc<SetupState>) -> Router {
    Router::new()
        .route("/", get(setup_page))
        .route("/test", post(send_test))
        .route("/complete", post(complete))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(security_headers))
}

async fn setup_page(State(state): State<Arc<SetupState>>) -> Html<String> {
    let topic = state.topic();
    let subscribe_url = state.client.topic_url(&topic);
    let qr = match subscribe_qr(subscribe_url.as_str()) {
        Ok(markup) => markup,
        Err(e) => {
            warn!(error = %e, "could not render subscribe QR code");
            String::new()
        }
    };
    Html(
        SETUP_HTML
            .replace("{{SUBSCRIBE_URL}}", &escape_html(subscribe_url.as_str()))
            .replace("{{TOPIC}}", &escape_html(&topic))
            .replace("{{QR_SVG}}", &qr),
    )
}

/// Inline SVG QR code for the phone to scan.
fn subscribe_qr(url: &str) -> anyhow::Result<String> {
    let code = QrCode::new(url.as_bytes()).context("subscribe URL does not fit in a QR code")?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(200, 200)
        .quiet_zone(true)
        .build())
}

async fn send_test(State(state): State<Arc<SetupState>>) -> impl IntoResponse {
    match state
        .client
        .send_plain(&state.topic(), TEST_TITLE, TEST_MESSAGE)
        .await
    {
        Ok(()) => Json(json!({ "success": true })),
        Err(e) => {
            warn!(error = %e, "setup test notification failed");
            Json(json!({ "success": false, "error": format!("{:#}", e) }))
        }
    }
}

async fn complete(State(state): State<Arc<SetupState>>) -> impl IntoResponse {
    let snapshot = {
        let mut config = state.config.lock().unwrap_or_else(PoisonError::into_inner);
        config.setup_complete = true;
        config.clone()
    };

    if let Err(e) = bootstrap::save(&state.path, &snapshot) {
        warn!(error = %e, "failed to save completed setup");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": "failed to save config" })),
        );
    }

    let done = state
        .done
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(done) = done {
        let _ = done.send(());
    }
    info!("setup complete");
    (StatusCode::OK, Json(json!({ "success": true })))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ── Server ────────────────────────────────────────────────────

pub struct SetupServer {
    listener: TcpListener,
    state: Arc<SetupState>,
    done_rx: oneshot::Receiver<()>,
}

impl SetupServer {
    /// Bind an ephemeral loopback port.
    pub async fn bind(
        client: NtfyClient,
        config: BootstrapConfig,
        path: PathBuf,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to create setup listener")?;
        let (state, done_rx) = SetupState::new(client, config, path);
        Ok(Self {
            listener,
            state,
            done_rx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("setup listener has no address")
    }

    /// Serve until setup is completed, then return the saved config.
    pub async fn run(self) -> anyhow::Result<BootstrapConfig> {
        let url = format!("http://{}", self.local_addr()?);
        println!("═══════════════════════════════════════════════════════════════");
        println!("  APPROVAL DAEMON SETUP");
        println!("  Open this URL to complete setup: {}", url);
        println!("═══════════════════════════════════════════════════════════════");

        let app = setup_router(self.state.clone());
        let done_rx = self.done_rx;
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                // A dropped sender also ends setup; the caller re-reads the config.
                let _ = done_rx.await;
            })
            .await
            .context("setup server error")?;

        Ok(self.state.config())
    }
}

/// Best effort; failure just means the user opens the printed URL.
pub fn open_browser(url: &str) {
    let program = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    match std::process::Command::new(program)
        .arg(url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, program, "could not open browser"),
    }
}

const SETUP_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Approval Daemon Setup</title>
    <style>
        body { font-family: -apple-system, system-ui, sans-serif; max-width: 600px; margin: 50px auto; padding: 20px; }
        h1 { color: #333; }
        .topic { font-family: monospace; background: #f5f5f5; padding: 10px; border-radius: 4px; word-break: break-all; }
        .btn { background: #4CAF50; color: white; border: none; padding: 12px 24px; border-radius: 4px; cursor: pointer; font-size: 16px; margin: 5px; }
        .btn:disabled { background: #ccc; cursor: not-allowed; }
        .btn-test { background: #2196F3; }
        .status { margin: 20px 0; padding: 15px; border-radius: 4px; }
        .status.success { background: #e8f5e9; color: #2e7d32; }
        .status.error { background: #ffebee; color: #c62828; }
        .step { margin: 20px 0; padding: 15px; background: #fafafa; border-radius: 4px; }
        .qr-container { text-align: center; margin: 15px 0; }
    </style>
</head>
<body>
    <h1>Approval Daemon Setup</h1>

    <div class="step">
        <strong>1. Install the ntfy app</strong>
        <p>Download it from <a href="https://ntfy.sh" target="_blank" rel="noreferrer">ntfy.sh</a> or your app store.</p>
    </div>

    <div class="step">
        <strong>2. Subscribe to your private topic</strong>
        <p>Scan the code or open this link on your phone, or subscribe to the topic by name:</p>
        <div class="qr-container">{{QR_SVG}}</div>
        <p><a href="{{SUBSCRIBE_URL}}" rel="noreferrer">{{SUBSCRIBE_URL}}</a></p>
        <div class="topic">{{TOPIC}}</div>
    </div>

    <div class="step">
        <strong>3. Send a test notification</strong>
        <p><button class="btn btn-test" id="test" onclick="sendTest()">Send test</button></p>
        <div id="status"></div>
    </div>

    <div class="step">
        <strong>4. Finish</strong>
        <p><button class="btn" id="complete" onclick="complete()" disabled>Complete setup</button></p>
    </div>

    <script>
        function showStatus(kind, text) {
            const el = document.getElementById("status");
            el.className = "status " + kind;
            el.textContent = text;
        }

        async function sendTest() {
            document.getElementById("test").disabled = true;
            try {
                const resp = await (await fetch("/test", { method: "POST" })).json();
                if (resp.success) {
                    showStatus("success", "Test sent. Did it arrive on your phone?");
                    document.getElementById("complete").disabled = false;
                } else {
                    showStatus("error", "Failed: " + resp.error);
                }
            } catch (err) {
                showStatus("error", "Error: " + err);
            }
            document.getElementById("test").disabled = false;
        }

        async function complete() {
            const resp = await (await fetch("/complete", { method: "POST" })).json();
            if (resp.success) {
                document.body.innerHTML = "<h1>Setup complete</h1><p>You can close this window.</p>";
            } else {
                showStatus("error", "Failed: " + resp.error);
            }
        }
    </script>
</body>
</html>
"#;
