use std::sync::Arc;

use chat_service::middleware::auth::TokenVerifier;
use chat_service::services::message_service::SendLocks;
use chat_service::services::{
    retention, ConversationService, MessagePipeline, ProfileDirectoryClient, ReadCursorService,
};
use chat_service::store::Store;
use chat_service::websocket::RoomRegistry;
use chat_service::{config, db, error, logging, migrations, routes, state::AppState};

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let pool = db::init_pool(&cfg.database)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    // Idempotent; the schema must be in sync before anything else runs.
    migrations::run_all(&pool)
        .await
        .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;

    // Wiring is a tree: every component is constructed once, collaborators
    // passed in explicitly.
    let store = Store::new(pool);
    let registry = RoomRegistry::new();
    let locks = Arc::new(SendLocks::new());
    let verifier = TokenVerifier::new(&cfg.auth_secret);
    let profiles = ProfileDirectoryClient::new(cfg.profile_directory_url.clone())?;
    let pipeline = MessagePipeline::new(store.clone(), registry.clone(), locks.clone());
    let conversations =
        ConversationService::new(store.clone(), registry.clone(), pipeline.clone(), locks.clone());
    let read_cursors = ReadCursorService::new(store.clone());

    let _retention_task = if cfg.retention.enabled {
        tracing::info!("retention sweep enabled");
        Some(retention::spawn_retention_task(store.clone(), cfg.retention.clone()))
    } else {
        None
    };

    let state = AppState {
        config: cfg.clone(),
        store,
        registry,
        verifier,
        profiles,
        conversations,
        pipeline,
        read_cursors,
    };

    let app = routes::build_router(state);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::StartServer(format!("bind {bind_addr}: {e}")))?;
    tracing::info!(%bind_addr, "chat-service listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| error::AppError::StartServer(format!("serve: {e}")))?;

    Ok(())
}
