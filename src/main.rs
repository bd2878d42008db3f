use std::sync::Arc;

use shapeboard::ai::{DisabledTranslator, LlmTranslator, Translator};
use shapeboard::config::{RoomConfig, ServerConfig};
use shapeboard::identity::{DevIdentityProvider, IdentityProvider, PgIdentityProvider};
use shapeboard::persistence::{MemorySnapshotStore, PgSnapshotStore, SnapshotStore};
use shapeboard::room::{RoomDeps, RoomRegistry};
use shapeboard::{db, llm, routes, state};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let server = ServerConfig::from_env();
    let room_config = RoomConfig::from_env();

    let pool = match &server.database_url {
        Some(url) => Some(db::init_pool(url).await.expect("database init failed")),
        None => None,
    };

    let store: Arc<dyn SnapshotStore> = match &pool {
        Some(pool) => Arc::new(PgSnapshotStore::new(pool.clone())),
        None => {
            tracing::warn!("DATABASE_URL not set; room snapshots are kept in memory only");
            Arc::new(MemorySnapshotStore::new())
        }
    };

    let identity: Arc<dyn IdentityProvider> = match (&pool, server.dev_identity) {
        (_, true) => {
            tracing::warn!("DEV_IDENTITY=1; accepting name:role tickets without verification");
            Arc::new(DevIdentityProvider)
        }
        (Some(pool), false) => Arc::new(PgIdentityProvider::new(pool.clone())),
        (None, false) => panic!("DATABASE_URL or DEV_IDENTITY=1 required to authenticate clients"),
    };

    let translator: Arc<dyn Translator> = match llm::from_env() {
        Ok(client) => {
            tracing::info!(model = %client.model(), "ai: translator enabled");
            Arc::new(LlmTranslator::new(Arc::new(client), room_config.ai.max_tokens))
        }
        Err(e) => {
            tracing::warn!(error = %e, "ai: translator disabled");
            Arc::new(DisabledTranslator)
        }
    };

    let rooms = RoomRegistry::new(RoomDeps { config: room_config, store, translator });
    let app = routes::app(state::AppState::new(rooms.clone(), identity));

    let port = server.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "shapeboard listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .expect("server failed");

    rooms.shutdown().await;
}
