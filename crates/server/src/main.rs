use std::{net::SocketAddr, sync::Arc};

use axum::{routing::get, Router};
use storage::Storage;
use sync_core::{Broadcaster, Coordinator, RoomRegistry};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;
mod ws;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let registry = Arc::new(RoomRegistry::new());
    let broadcaster = Arc::new(Broadcaster::new(registry.clone()));
    let coordinator = Coordinator::new(
        Arc::new(storage),
        broadcaster.clone(),
        settings.coordinator(),
    );
    let state = AppState {
        coordinator,
        registry: registry.clone(),
        outbox_capacity: settings.outbox_capacity,
    };
    let app = build_router(Arc::new(state));

    let heartbeat = broadcaster.spawn_heartbeat(settings.heartbeat_interval());

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry.clone()))
        .await?;

    heartbeat.abort();
    let stats = broadcaster.stats();
    info!(
        published = stats.published,
        delivered = stats.delivered,
        dropped = stats.dropped,
        "server stopped"
    );
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", api::routes())
        .route("/ws", get(ws::ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// Resolves on Ctrl-C. Closing every outbox makes socket writers send a close
/// frame, so upgraded connections wind down with the listener.
async fn shutdown_signal(registry: Arc<RoomRegistry>) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    let closed = registry.shutdown();
    info!(closed, "shutting down");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
