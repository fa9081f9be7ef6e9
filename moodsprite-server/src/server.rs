use std::sync::Arc;

use moodsprite_core::config::SessionStoreKind;
use moodsprite_core::{
    upstream, MemorySessionStore, PgSessionStore, SessionManager, SessionStore, SpriteConfig,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::http::{self, HttpState};

/// Connect the configured session store, creating the schema for Postgres.
pub async fn connect_store(config: &SpriteConfig) -> anyhow::Result<Arc<dyn SessionStore>> {
    match config.sessions.store {
        SessionStoreKind::Postgres => {
            let pool = moodsprite_core::db::create_pool(&config.database).await?;
            moodsprite_core::db::ensure_schema(&pool).await?;
            tracing::info!("Session store: PostgreSQL");
            Ok(Arc::new(PgSessionStore::new(pool)))
        }
        SessionStoreKind::Memory => {
            tracing::warn!("Session store: in-memory (sessions are lost on restart)");
            Ok(Arc::new(MemorySessionStore::new()))
        }
    }
}

/// Assemble handler state. The upstream client is built once here and handed
/// to every relay connection through the state.
pub async fn build_state(config: SpriteConfig) -> anyhow::Result<Arc<HttpState>> {
    let store = connect_store(&config).await?;
    let upstream = upstream::connect(&config.upstream)?;
    tracing::info!(
        "Upstream sprite service: {} ({})",
        config.upstream.base_url,
        upstream.name()
    );

    Ok(Arc::new(HttpState {
        config,
        sessions: SessionManager::new(store),
        upstream,
        shutdown: CancellationToken::new(),
    }))
}

/// Serve until the shutdown signal fires.
pub async fn run(config: SpriteConfig, shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let state = build_state(config).await?;
    http::start_http_server(state, shutdown).await
}
