mod config;
mod db;
mod error;
mod routes;
mod services;
mod state;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, ConfigError};
use crate::services::persistence::{self, StoreWorkerConfig};
use crate::services::store::{MemoryRoomStore, PgRoomStore, RoomStore};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database init failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("server io: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("whiteboard_server=info,tower_http=info")),
        )
        .init();

    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!(error = %e, "failed to load .env");
        }
    }

    let config = Config::from_env()?;

    let store: Arc<dyn RoomStore> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections).await?;
            info!(max_connections = config.db_max_connections, "room store: postgres");
            Arc::new(PgRoomStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set; rooms are kept in memory and lost on restart");
            Arc::new(MemoryRoomStore::new())
        }
    };

    let (store_tx, _store_worker) = persistence::spawn_store_worker(Arc::clone(&store), StoreWorkerConfig::from(&config));
    let port = config.port;
    let state = state::AppState::new(store, Some(store_tx.clone()), config);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(%port, "whiteboard server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("shutting down; flushing store writes");
    if !persistence::flush(&store_tx).await {
        warn!("store worker exited before flush");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
