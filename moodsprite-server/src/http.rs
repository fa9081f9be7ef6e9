//! Moodsprite HTTP API
//!
//! Axum-based HTTP server for the sprite dashboard.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function. The inner functions are directly testable without axum dispatch
//! machinery. The stream endpoint is the exception: it hands the connection to
//! the relay loop in [`crate::relay`] and answers with an SSE body.
//!
//! Endpoints:
//! - GET /health         — session store health
//! - GET /version        — server version info
//! - GET /api/character  — current character definition
//! - GET /api/history    — character version history
//! - GET /api/stream     — live cue relay (Server-Sent Events)

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream;
use moodsprite_core::models::{CharacterView, HistoryQuery, HistoryView, InteractionLog};
use moodsprite_core::{SessionManager, SpriteConfig, SpriteUpstream};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::auth::authenticate;
use crate::encoder;
use crate::relay::{ClientInfo, RelayConnection, OUTBOUND_BUFFER};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub config: SpriteConfig,
    pub sessions: SessionManager,
    pub upstream: Arc<dyn SpriteUpstream>,
    /// Cancelled on shutdown so open relays close and graceful shutdown can finish.
    pub shutdown: CancellationToken,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/character", get(character_handler))
        .route("/api/history", get(history_handler))
        .route("/api/stream", get(stream_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let relay_shutdown = state.shutdown.clone();

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Moodsprite HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
            relay_shutdown.cancel();
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    #[serde(default)]
    pub include_data: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl HistoryParams {
    /// Only the literal `true` enables image data, matching the dashboard's query strings.
    pub fn to_query(&self) -> HistoryQuery {
        HistoryQuery {
            include_data: self.include_data.as_deref() == Some("true"),
            version: self.version.clone().filter(|v| !v.is_empty()),
        }
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — asks the session store and returns (status_code, json_body).
pub async fn health_inner(sessions: &SessionManager) -> (StatusCode, serde_json::Value) {
    match sessions.store().health().await {
        Ok(store) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": store,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "moodsprite/1",
    })
}

/// Inner character fetch — maps the upstream character for the dashboard and
/// logs the interaction.
pub async fn character_inner(
    state: &HttpState,
    user_id: &str,
    client: &ClientInfo,
) -> (StatusCode, serde_json::Value) {
    let start = Instant::now();

    match state.upstream.get_character().await {
        Ok(character) => {
            let view = CharacterView::from(&character);
            let log = InteractionLog {
                duration_ms: Some(start.elapsed().as_millis() as u64),
                sprite_version: Some(view.semantic_version.clone()),
                response_body: Some(serde_json::json!({
                    "semanticVersion": view.semantic_version,
                    "characterName": view.character.name,
                    "moodCount": view.character.moods.len(),
                    "totalKeyframes": view.character.keyframe_count(),
                })),
                user_agent: client.user_agent.clone(),
                ip_address: client.ip_address.clone(),
                ..InteractionLog::new(user_id, "/api/character", "GET", 200)
            };
            state.sessions.log_interaction(log).await;

            (
                StatusCode::OK,
                serde_json::to_value(&view).unwrap_or_else(|_| serde_json::json!({})),
            )
        }
        Err(e) => {
            tracing::error!("Failed to fetch character data: {}", e);
            let log = InteractionLog {
                duration_ms: Some(start.elapsed().as_millis() as u64),
                error_message: Some(e.to_string()),
                user_agent: client.user_agent.clone(),
                ip_address: client.ip_address.clone(),
                ..InteractionLog::new(user_id, "/api/character", "GET", 500)
            };
            state.sessions.log_interaction(log).await;

            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "Failed to fetch character data" }),
            )
        }
    }
}

/// Inner history fetch — maps the upstream history, stripping image data unless requested.
pub async fn history_inner(
    state: &HttpState,
    user_id: &str,
    client: &ClientInfo,
    params: &HistoryParams,
) -> (StatusCode, serde_json::Value) {
    let start = Instant::now();
    let query = params.to_query();
    let request_body = serde_json::json!({
        "includeData": query.include_data,
        "specificVersion": query.version,
    });

    match state.upstream.get_character_history(&query).await {
        Ok(history) => {
            let view = HistoryView::from_history(&history, query.include_data);
            let log = InteractionLog {
                duration_ms: Some(start.elapsed().as_millis() as u64),
                request_body: Some(request_body),
                response_body: Some(serde_json::json!({
                    "currentName": view.current_name,
                    "latestVersion": view.latest_version,
                    "versionCount": view.versions.len(),
                })),
                user_agent: client.user_agent.clone(),
                ip_address: client.ip_address.clone(),
                ..InteractionLog::new(user_id, "/api/history", "GET", 200)
            };
            state.sessions.log_interaction(log).await;

            (
                StatusCode::OK,
                serde_json::to_value(&view).unwrap_or_else(|_| serde_json::json!({})),
            )
        }
        Err(e) => {
            tracing::error!("Failed to fetch character history: {}", e);
            let log = InteractionLog {
                duration_ms: Some(start.elapsed().as_millis() as u64),
                request_body: Some(request_body),
                error_message: Some(e.to_string()),
                user_agent: client.user_agent.clone(),
                ip_address: client.ip_address.clone(),
                ..InteractionLog::new(user_id, "/api/history", "GET", 500)
            };
            state.sessions.log_interaction(log).await;

            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "Failed to fetch character history" }),
            )
        }
    }
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.sessions).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn character_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> Response {
    let Some(user_id) = authenticate(&headers, &state.config.auth) else {
        return unauthorized_json();
    };
    let (status, body) = character_inner(&state, &user_id, &client_info(&headers)).await;
    (status, Json(body)).into_response()
}

pub async fn history_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Response {
    let Some(user_id) = authenticate(&headers, &state.config.auth) else {
        return unauthorized_json();
    };
    let (status, body) = history_inner(&state, &user_id, &client_info(&headers), &params).await;
    (status, Json(body)).into_response()
}

/// Open a relay connection and answer with its SSE stream.
///
/// Status is decided before any body is sent: 401 without identity (no session
/// is created), 502 when the upstream subscription cannot be opened. After
/// that every failure travels in-band as a diagnostic event.
pub async fn stream_handler(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let Some(user_id) = authenticate(&headers, &state.config.auth) else {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    };
    let client = client_info(&headers);

    let mut connection = match RelayConnection::open(
        &state.sessions,
        state.upstream.as_ref(),
        &user_id,
        client.clone(),
    )
    .await
    {
        Ok(c) => c,
        Err(e) => {
            let log = InteractionLog {
                error_message: Some(e.to_string()),
                user_agent: client.user_agent,
                ip_address: client.ip_address,
                ..InteractionLog::new(&user_id, crate::relay::STREAM_ENDPOINT, "SSE", 502)
            };
            state.sessions.log_interaction(log).await;
            return (StatusCode::BAD_GATEWAY, "Upstream unavailable").into_response();
        }
    };
    connection.log_start().await;

    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    tokio::spawn(connection.run(tx, state.shutdown.child_token()));

    let events = stream::unfold(rx, |mut rx| async move {
        let message = rx.recv().await?;
        Some((Ok::<_, Infallible>(encoder::to_event(&message)), rx))
    });

    let mut sse = Sse::new(events);
    if state.config.http.keep_alive_seconds > 0 {
        sse = sse.keep_alive(
            KeepAlive::new().interval(Duration::from_secs(state.config.http.keep_alive_seconds)),
        );
    }

    let origin = HeaderValue::from_str(&state.config.http.allowed_origin)
        .unwrap_or_else(|_| HeaderValue::from_static("*"));

    (
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (header::CONNECTION, HeaderValue::from_static("keep-alive")),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, origin),
            (
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Cache-Control"),
            ),
        ],
        sse,
    )
        .into_response()
}

// ============================================================================
// Helpers
// ============================================================================

fn unauthorized_json() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "Unauthorized" })),
    )
        .into_response()
}

/// User agent and client address, preferring proxy headers.
pub fn client_info(headers: &HeaderMap) -> ClientInfo {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    ClientInfo {
        user_agent: header_str(header::USER_AGENT.as_str()),
        ip_address: Some(
            header_str("x-forwarded-for")
                .or_else(|| header_str("x-real-ip"))
                .unwrap_or_else(|| "unknown".to_string()),
        ),
    }
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use moodsprite_core::MemorySessionStore;

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "moodsprite/1");
    }

    #[test]
    fn test_history_params_only_literal_true_includes_data() {
        let params = |include: Option<&str>, version: Option<&str>| HistoryParams {
            include_data: include.map(str::to_string),
            version: version.map(str::to_string),
        };

        assert!(params(Some("true"), None).to_query().include_data);
        assert!(!params(Some("1"), None).to_query().include_data);
        assert!(!params(None, None).to_query().include_data);
        assert_eq!(params(None, Some("")).to_query().version, None);
        assert_eq!(
            params(None, Some("1.0.0")).to_query().version.as_deref(),
            Some("1.0.0")
        );
    }

    #[test]
    fn test_client_info_prefers_forwarded_for() {
        let mut h = HeaderMap::new();
        h.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        h.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        h.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));

        let info = client_info(&h);
        assert_eq!(info.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8"));
    }

    #[test]
    fn test_client_info_defaults_to_unknown() {
        let info = client_info(&HeaderMap::new());
        assert_eq!(info.ip_address.as_deref(), Some("unknown"));
        assert!(info.user_agent.is_none());
    }

    #[tokio::test]
    async fn test_health_inner_memory_store() {
        let sessions = SessionManager::new(Arc::new(MemorySessionStore::new()));
        let (status, body) = health_inner(&sessions).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["store"].as_str().unwrap().starts_with("memory"));
    }
}
