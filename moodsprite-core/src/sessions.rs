//! Relay session persistence.
//!
//! `SessionStore` is the durable collaborator (Postgres in production, an
//! in-memory map for tests and local runs). `SessionManager` wraps a store and
//! makes every call best-effort: failures are logged and swallowed so that
//! telemetry can never abort a relay.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::SpriteError;
use crate::models::{InteractionLog, RelaySession};

// ============================================================================
// SessionStore trait
// ============================================================================

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &RelaySession) -> Result<(), SpriteError>;

    async fn increment_served(&self, session_id: Uuid) -> Result<(), SpriteError>;

    /// Stamp `ended_at`. Returns `false` when the session was already closed.
    async fn close_session(&self, session_id: Uuid) -> Result<bool, SpriteError>;

    async fn fetch_session(&self, session_id: Uuid) -> Result<Option<RelaySession>, SpriteError>;

    async fn insert_interaction(&self, log: &InteractionLog) -> Result<(), SpriteError>;

    /// Backend description for `/health`.
    async fn health(&self) -> Result<String, SpriteError>;
}

// ============================================================================
// Postgres store
// ============================================================================

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert_session(&self, session: &RelaySession) -> Result<(), SpriteError> {
        sqlx::query(
            r#"
            INSERT INTO relay_sessions (id, user_id, keyframes_served_count, started_at, ended_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(session.id)
        .bind(&session.user_id)
        .bind(session.keyframes_served_count)
        .bind(session.started_at)
        .bind(session.ended_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_served(&self, session_id: Uuid) -> Result<(), SpriteError> {
        sqlx::query(
            "UPDATE relay_sessions SET keyframes_served_count = keyframes_served_count + 1 WHERE id = $1",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close_session(&self, session_id: Uuid) -> Result<bool, SpriteError> {
        let result = sqlx::query(
            "UPDATE relay_sessions SET ended_at = now() WHERE id = $1 AND ended_at IS NULL",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch_session(&self, session_id: Uuid) -> Result<Option<RelaySession>, SpriteError> {
        let row = sqlx::query_as::<_, RelaySession>(
            r#"
            SELECT id, user_id, keyframes_served_count, started_at, ended_at
            FROM relay_sessions WHERE id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_interaction(&self, log: &InteractionLog) -> Result<(), SpriteError> {
        sqlx::query(
            r#"
            INSERT INTO interaction_logs (
                user_id, session_id, endpoint, method, status_code, duration_ms,
                keyframe_uuid, sprite_version, error_message, user_agent, ip_address,
                request_body, response_body
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&log.user_id)
        .bind(log.session_id)
        .bind(&log.endpoint)
        .bind(&log.method)
        .bind(i32::from(log.status_code))
        .bind(log.duration_ms.map(|ms| ms as i64))
        .bind(&log.keyframe_uuid)
        .bind(&log.sprite_version)
        .bind(&log.error_message)
        .bind(&log.user_agent)
        .bind(&log.ip_address)
        .bind(&log.request_body)
        .bind(&log.response_body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn health(&self) -> Result<String, SpriteError> {
        Ok(crate::db::health_check(&self.pool).await?)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<Uuid, RelaySession>,
    interactions: Vec<InteractionLog>,
}

/// Process-local store. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T, SpriteError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| SpriteError::Store("memory store lock poisoned".to_string()))?;
        Ok(f(&mut guard))
    }

    /// All sessions currently held, in no particular order.
    pub fn sessions(&self) -> Vec<RelaySession> {
        self.with_state(|s| s.sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Interaction records in insertion order.
    pub fn interactions(&self) -> Vec<InteractionLog> {
        self.with_state(|s| s.interactions.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_session(&self, session: &RelaySession) -> Result<(), SpriteError> {
        self.with_state(|s| {
            s.sessions.insert(session.id, session.clone());
        })
    }

    async fn increment_served(&self, session_id: Uuid) -> Result<(), SpriteError> {
        self.with_state(|s| match s.sessions.get_mut(&session_id) {
            Some(session) => {
                session.keyframes_served_count += 1;
                Ok(())
            }
            None => Err(SpriteError::Store(format!("unknown session {}", session_id))),
        })?
    }

    async fn close_session(&self, session_id: Uuid) -> Result<bool, SpriteError> {
        self.with_state(|s| match s.sessions.get_mut(&session_id) {
            Some(session) if session.is_open() => {
                session.ended_at = Some(Utc::now());
                true
            }
            _ => false,
        })
    }

    async fn fetch_session(&self, session_id: Uuid) -> Result<Option<RelaySession>, SpriteError> {
        self.with_state(|s| s.sessions.get(&session_id).cloned())
    }

    async fn insert_interaction(&self, log: &InteractionLog) -> Result<(), SpriteError> {
        self.with_state(|s| s.interactions.push(log.clone()))
    }

    async fn health(&self) -> Result<String, SpriteError> {
        self.with_state(|s| format!("memory ({} sessions)", s.sessions.len()))
    }
}

// ============================================================================
// SessionManager
// ============================================================================

/// Best-effort front for a [`SessionStore`].
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Allocate a session id and persist the record. The id is generated
    /// locally, so a store outage still yields a usable session.
    pub async fn create_session(&self, user_id: &str) -> Uuid {
        let session = RelaySession::start(user_id);
        if let Err(e) = self.store.insert_session(&session).await {
            tracing::warn!("Failed to persist session {} for {}: {}", session.id, user_id, e);
        }
        session.id
    }

    pub async fn record_delivery(&self, session_id: Uuid) {
        if let Err(e) = self.store.increment_served(session_id).await {
            tracing::warn!("Failed to record delivery for session {}: {}", session_id, e);
        }
    }

    /// Close the session. Closing twice is a no-op.
    pub async fn end_session(&self, session_id: Uuid) {
        match self.store.close_session(session_id).await {
            Ok(true) => tracing::debug!("Session {} closed", session_id),
            Ok(false) => tracing::debug!("Session {} was already closed", session_id),
            Err(e) => tracing::warn!("Failed to close session {}: {}", session_id, e),
        }
    }

    pub async fn log_interaction(&self, log: InteractionLog) {
        if let Err(e) = self.store.insert_interaction(&log).await {
            tracing::warn!("Failed to log interaction for {}: {}", log.endpoint, e);
        }
    }
}
