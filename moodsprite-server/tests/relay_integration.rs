//! End-to-end tests for the Moodsprite HTTP API.
//!
//! The upstream sprite service is a wiremock server; sessions live in the
//! in-memory store so nothing here needs PostgreSQL. Requests go through the
//! full router with `oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use moodsprite_core::{upstream, MemorySessionStore, SessionManager, SpriteConfig};
use moodsprite_server::http::{build_router, HttpState};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "test-token";
const USER: &str = "user_test";

fn test_config(upstream_url: &str) -> SpriteConfig {
    SpriteConfig::from_toml_str(&format!(
        r#"
        [http]
        host = "127.0.0.1"
        port = 0
        keep_alive_seconds = 0

        [upstream]
        base_url = "{}"
        transport = "http"
        max_retries = 1
        retry_delay_ms = 1

        [sessions]
        store = "memory"

        [[auth.tokens]]
        token = "{}"
        user_id = "{}"
        "#,
        upstream_url, TOKEN, USER
    ))
    .expect("test config should parse")
}

/// Router wired to a wiremock upstream, plus a handle on its session store.
async fn make_app(server: &MockServer) -> (axum::Router, MemorySessionStore) {
    let config = test_config(&server.uri());
    let store = MemorySessionStore::new();
    let upstream = upstream::connect(&config.upstream).expect("upstream client");
    let state = Arc::new(HttpState {
        config,
        sessions: SessionManager::new(Arc::new(store.clone())),
        upstream,
        shutdown: CancellationToken::new(),
    });
    (build_router(state), store)
}

fn authed(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(header::USER_AGENT, "integration-test")
        .body(Body::empty())
        .unwrap()
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Parse `data:` payloads out of an SSE body.
fn sse_payloads(body: &str) -> Vec<serde_json::Value> {
    body.split("\n\n")
        .filter_map(|block| {
            block
                .lines()
                .find_map(|line| line.strip_prefix("data: "))
                .map(|data| serde_json::from_str(data).expect("each event is standalone JSON"))
        })
        .collect()
}

fn character_json() -> serde_json::Value {
    json!({
        "semantic_version": "1.0.0",
        "character": {
            "name": "Sera",
            "notes": "SLR-9 empathic interface",
            "changelog": "Initial version",
            "subject_image": { "uuid": "subject", "description": "neutral reference image", "image_data": "U1VC" },
            "moods": [
                {
                    "uuid": "m-helpful",
                    "description": "helpful",
                    "notes": "",
                    "keyframes": [
                        { "uuid": "A", "description": "smiling", "image_data": "QUFB" },
                        { "uuid": "B", "description": "waving", "image_data": "QkJC" }
                    ]
                },
                {
                    "uuid": "m-sad",
                    "description": "sad",
                    "notes": "",
                    "keyframes": [
                        { "uuid": "C", "description": "deflated", "image_data": "Q0ND" }
                    ]
                }
            ]
        }
    })
}

async fn mount_session(server: &MockServer, ndjson: &str) {
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-ndjson")
                .set_body_string(ndjson.to_string()),
        )
        .mount(server)
        .await;
}

// ===========================================================================
// TEST 1: unauthenticated stream request — 401, no session, no stream
// ===========================================================================
#[tokio::test]
async fn test_stream_requires_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let (app, store) = make_app(&server).await;

    let req = Request::builder()
        .uri("/api/stream")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(!content_type.starts_with("text/event-stream"));
    assert!(store.sessions().is_empty(), "no session may be created");
}

// ===========================================================================
// TEST 2: cues A, B, then end — two data blocks in order, count 2, closed
// ===========================================================================
#[tokio::test]
async fn test_stream_relays_cues_in_order() {
    let server = MockServer::start().await;
    mount_session(
        &server,
        concat!(
            r#"{"timestamp":"2025-03-01T12:00:00Z","keyframe_uuid":"A","duration_valid_ms":1000,"explanation":"smiling"}"#,
            "\n",
            r#"{"timestamp":"2025-03-01T12:00:01Z","keyframe_uuid":"B","explanation":"","alt_cue_text":null}"#,
            "\n"
        ),
    )
    .await;
    let (app, store) = make_app(&server).await;

    let resp = app.oneshot(authed("/api/stream")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(resp.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");
    assert_eq!(
        resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );

    let body = body_string(resp).await;
    let payloads = sse_payloads(&body);

    assert_eq!(payloads.len(), 2, "body was: {}", body);
    assert_eq!(payloads[0]["keyframeUuid"], "A");
    assert_eq!(payloads[0]["durationValidMs"], 1000);
    assert_eq!(payloads[0]["explanation"], "smiling");
    assert_eq!(payloads[1]["keyframeUuid"], "B");
    let second = payloads[1].as_object().unwrap();
    assert!(!second.contains_key("durationValidMs"));
    assert!(!second.contains_key("explanation"));
    assert!(!second.contains_key("altCueText"));
    assert!(!body.contains("null"));

    let sessions = store.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].user_id, USER);
    assert_eq!(sessions[0].keyframes_served_count, 2);
    assert!(sessions[0].ended_at.is_some());

    // One start record plus one per served keyframe.
    let logs = store.interactions();
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[0].method, "SSE");
    assert!(logs[0].keyframe_uuid.is_none());
    assert_eq!(logs[1].keyframe_uuid.as_deref(), Some("A"));
    assert_eq!(logs[2].keyframe_uuid.as_deref(), Some("B"));
    assert_eq!(logs[1].user_agent.as_deref(), Some("integration-test"));
    assert_eq!(logs[1].ip_address.as_deref(), Some("unknown"));
}

// ===========================================================================
// TEST 3: malformed cue mid-stream — diagnostic event, stream continues
// ===========================================================================
#[tokio::test]
async fn test_stream_reports_malformed_cue_in_band() {
    let server = MockServer::start().await;
    mount_session(
        &server,
        concat!(
            r#"{"timestamp":"2025-03-01T12:00:00Z","keyframe_uuid":"A"}"#,
            "\n",
            r#"{"timestamp":"not-a-time","keyframe_uuid":"B"}"#,
            "\n",
            r#"{"timestamp":"2025-03-01T12:00:02Z","keyframe_uuid":"C"}"#,
            "\n"
        ),
    )
    .await;
    let (app, store) = make_app(&server).await;

    let resp = app.oneshot(authed("/api/stream")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let payloads = sse_payloads(&body_string(resp).await);

    assert_eq!(payloads.len(), 3);
    assert_eq!(payloads[0]["keyframeUuid"], "A");
    assert_eq!(payloads[1]["error"], "Processing error");
    assert!(payloads[1]["message"].as_str().unwrap().contains("not-a-time"));
    assert_eq!(payloads[2]["keyframeUuid"], "C");

    assert_eq!(store.sessions()[0].keyframes_served_count, 2);
}

// ===========================================================================
// TEST 4: upstream unavailable — 502 up front, session closed
// ===========================================================================
#[tokio::test]
async fn test_stream_fails_fast_when_upstream_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Character not loaded"))
        .mount(&server)
        .await;
    let (app, store) = make_app(&server).await;

    let resp = app.oneshot(authed("/api/stream")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let sessions = store.sessions();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].ended_at.is_some());
    assert_eq!(sessions[0].keyframes_served_count, 0);

    let logs = store.interactions();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_code, 502);
    assert!(logs[0].error_message.is_some());
}

// ===========================================================================
// TEST 5: GET /api/character — dashboard shape and interaction log
// ===========================================================================
#[tokio::test]
async fn test_character_endpoint_maps_upstream_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/character"))
        .respond_with(ResponseTemplate::new(200).set_body_json(character_json()))
        .mount(&server)
        .await;
    let (app, store) = make_app(&server).await;

    let resp = app.oneshot(authed("/api/character")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();

    assert_eq!(body["semanticVersion"], "1.0.0");
    assert_eq!(body["character"]["name"], "Sera");
    assert_eq!(body["character"]["subjectImage"]["uuid"], "subject");
    assert_eq!(body["character"]["moods"][0]["keyframes"][1]["imageData"], "QkJC");

    let logs = store.interactions();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].endpoint, "/api/character");
    assert_eq!(logs[0].sprite_version.as_deref(), Some("1.0.0"));
    let summary = logs[0].response_body.as_ref().unwrap();
    assert_eq!(summary["moodCount"], 2);
    assert_eq!(summary["totalKeyframes"], 3);
}

// ===========================================================================
// TEST 6: GET /api/character upstream failure — 500 with fixed message
// ===========================================================================
#[tokio::test]
async fn test_character_endpoint_upstream_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/character"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let (app, store) = make_app(&server).await;

    let resp = app.oneshot(authed("/api/character")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(body["error"], "Failed to fetch character data");

    let logs = store.interactions();
    assert_eq!(logs[0].status_code, 500);
    assert!(logs[0].error_message.is_some());
}

// ===========================================================================
// TEST 7: GET /api/history — image data stripped unless requested
// ===========================================================================
#[tokio::test]
async fn test_history_endpoint_respects_include_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history"))
        .and(query_param("include_data", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "current_name": "Sera",
            "latest_version": "1.0.0",
            "versions": [character_json()["character"].clone()]
        })))
        .mount(&server)
        .await;
    let (app, _store) = make_app(&server).await;

    let resp = app.oneshot(authed("/api/history")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();

    assert_eq!(body["currentName"], "Sera");
    assert_eq!(body["latestVersion"], "1.0.0");
    let keyframe = body["versions"][0]["moods"][0]["keyframes"][0]
        .as_object()
        .unwrap();
    assert!(!keyframe.contains_key("imageData"));
}

// ===========================================================================
// TEST 8: data endpoints refuse anonymous callers
// ===========================================================================
#[tokio::test]
async fn test_data_endpoints_require_authentication() {
    let server = MockServer::start().await;
    let (app, store) = make_app(&server).await;

    for uri in ["/api/character", "/api/history?includeData=true"] {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{}", uri);
    }
    assert!(store.interactions().is_empty());
}

// ===========================================================================
// TEST 9: GET /health and /version
// ===========================================================================
#[tokio::test]
async fn test_health_and_version_endpoints() {
    let server = MockServer::start().await;
    let (app, _store) = make_app(&server).await;

    let resp = app.clone().oneshot(authed("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(body["status"], "healthy");

    let resp = app.oneshot(authed("/version")).await.unwrap();
    let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(body["protocol"], "moodsprite/1");
}
