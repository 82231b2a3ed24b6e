//! First-run setup page: topic display, test push, completion.

use approval_daemon::notification::ntfy::NtfyClient;
use approval_daemon::setup::{setup_router, SetupServer, SetupState};
use approval_daemon::store::bootstrap::{self, BootstrapConfig};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn call(app: axum::Router, method: &str, uri: &str) -> (StatusCode, String) {
    let resp = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_page_shows_subscription_url() {
    let dir = tempfile::tempdir().unwrap();
    let config = BootstrapConfig::generate();
    let client = NtfyClient::new("https://ntfy.example.com", None).unwrap();
    let (state, _done) = SetupState::new(client, config.clone(), dir.path().join("cfg.json"));

    let (status, html) = call(setup_router(state), "GET", "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains(&format!("https://ntfy.example.com/{}", config.ntfy_topic)));
}

#[tokio::test]
async fn test_page_embeds_subscribe_qr_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = BootstrapConfig::generate();
    let client = NtfyClient::new("https://ntfy.example.com", None).unwrap();
    let (state, _done) = SetupState::new(client, config, dir.path().join("cfg.json"));

    let (_, html) = call(setup_router(state), "GET", "/").await;
    assert!(!html.contains("{{QR_SVG}}"));
    let qr = html
        .split("<div class=\"qr-container\">")
        .nth(1)
        .expect("page has a QR container");
    assert!(qr.contains("<svg"));
    assert!(qr.contains("</svg>"));
}

#[tokio::test]
async fn test_test_push_reports_success_and_failure() {
    let server = MockServer::start().await;
    let config = BootstrapConfig::generate();
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "topic": config.ntfy_topic,
            "title": "Test Notification",
        })))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = NtfyClient::new(&server.uri(), None).unwrap();
    let (state, _done) = SetupState::new(client, config, dir.path().join("cfg.json"));
    let app = setup_router(state);

    let (status, body) = call(app.clone(), "POST", "/test").await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["success"], true);

    let (_, body) = call(app, "POST", "/test").await;
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn test_complete_persists_and_signals() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg.json");
    let config = BootstrapConfig::generate();
    bootstrap::save(&path, &config).unwrap();

    let client = NtfyClient::new("https://ntfy.sh", None).unwrap();
    let (state, done) = SetupState::new(client, config.clone(), path.clone());

    let (status, body) = call(setup_router(state.clone()), "POST", "/complete").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["success"], true);

    done.await.unwrap();
    assert!(state.config().setup_complete);
    let saved = bootstrap::load(&path).unwrap().unwrap();
    assert!(saved.setup_complete);
    assert_eq!(saved.ntfy_topic, config.ntfy_topic);
    assert_eq!(saved.signing_secret, config.signing_secret);
}

#[tokio::test]
async fn test_server_stops_after_completion() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg.json");
    let config = BootstrapConfig::generate();
    let client = NtfyClient::new("https://ntfy.sh", None).unwrap();

    let server = SetupServer::bind(client, config, path.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    assert!(addr.ip().is_loopback());
    let running = tokio::spawn(server.run());

    let resp = reqwest::Client::new()
        .post(format!("http://{}/complete", addr))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let finished = running.await.unwrap().unwrap();
    assert!(finished.setup_complete);
    assert!(bootstrap::load(&path).unwrap().unwrap().setup_complete);
}
