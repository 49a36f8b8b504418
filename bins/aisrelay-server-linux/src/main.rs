use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aisrelay_core::{
    FileConfigStorage, MemoryStore, Settings, SqliteStore, StorageBackend, StorageSettings,
};
use aisrelay_providers::{SharedStore, StreamClient};
use aisrelay_server::{ServerConfig, SubscriberRegistry, SubscriberServer, POSITIONS_PATH};
use aisrelay_web::{create_router, ServerState};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_PATH: &str = "./aisrelay.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,aisrelay=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("AIS relay starting...");

    let settings = load_settings()?;

    let store = open_store(&settings.storage)?;
    let registry = Arc::new(SubscriberRegistry::new().with_send_timeout(Duration::from_secs(
        settings.subscriber_send_timeout_secs.max(1),
    )));
    let client = Arc::new(StreamClient::new(
        settings.aisstream.clone(),
        store.clone(),
        registry.clone(),
    ));

    // Spawn subscriber WebSocket server
    let ws_server = SubscriberServer::new(
        ServerConfig {
            bind_addr: settings.ws_addr,
        },
        registry,
    );
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server.run().await {
            tracing::error!("WebSocket server error: {}", e);
        }
    });

    // Start HTTP API server
    let state = ServerState::new(store, client.stats_handle())
        .with_cors_origins(settings.cors_origins.clone());
    let http_addr = settings.http_addr;
    let http_handle = tokio::spawn(async move {
        if let Err(e) = start_http_server(http_addr, state).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    client.start();

    tracing::info!("AIS relay ready");
    tracing::info!("   Subscribers: ws://{}{}", settings.ws_addr, POSITIONS_PATH);
    tracing::info!("   HTTP API:    http://{}/api/v1/vessels", settings.http_addr);
    tracing::info!("   Status:      http://{}/ais/status", settings.http_addr);

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = ws_handle => {
            tracing::warn!("WebSocket server stopped");
        }
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
    }

    client.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Load settings from `AISRELAY_CONFIG` (or the default path), then apply
/// environment overrides.
fn load_settings() -> anyhow::Result<Settings> {
    let path =
        std::env::var("AISRELAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let storage = FileConfigStorage::new(path);

    let mut settings = storage.load_or_default()?;
    settings.apply_env()?;

    tracing::info!(
        config = %storage.path().display(),
        http = %settings.http_addr,
        ws = %settings.ws_addr,
        storage = ?settings.storage.backend,
        ingestion = settings.aisstream.credential().is_some(),
        "Configuration loaded"
    );
    Ok(settings)
}

/// Open the configured vessel store.
fn open_store(storage: &StorageSettings) -> anyhow::Result<SharedStore> {
    let store: SharedStore = match storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory store, data is lost on restart");
            Arc::new(RwLock::new(MemoryStore::new()))
        }
        StorageBackend::Sqlite => {
            let sqlite = SqliteStore::open(&storage.path)?;
            tracing::info!(path = %storage.path.display(), "Opened SQLite store");
            Arc::new(RwLock::new(sqlite))
        }
    };
    Ok(store)
}

/// Start the HTTP API server
async fn start_http_server(addr: SocketAddr, state: ServerState) -> anyhow::Result<()> {
    let app = create_router(Arc::new(state)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
