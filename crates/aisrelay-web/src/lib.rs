//! # aisrelay-web
//!
//! HTTP API for the AIS relay.
//!
//! This crate provides:
//! - Health and ingestion status endpoints
//! - Read-only vessel queries over the shared vessel store
//!
//! ## Architecture
//!
//! The web layer is built on Axum and provides these route groups:
//!
//! - `/health`, `/ais/status` - Liveness and stream client statistics
//! - `/api/v1/vessels` - Vessel list, detail and track
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aisrelay_web::{create_router, ServerState};
//!
//! let state = Arc::new(ServerState::new(store, client.stats_handle()));
//! let app = create_router(state);
//!
//! let listener = TcpListener::bind("0.0.0.0:8000").await?;
//! axum::serve(listener, app).await?;
//! ```

pub mod error;
pub mod routes;

// Re-exports
pub use error::ApiError;
pub use routes::create_router;

use std::sync::Arc;

use aisrelay_providers::{IngestStats, SharedStore};

/// Shared server state for all route handlers.
pub struct ServerState {
    /// Version reported by `/health`.
    pub version: String,

    /// Origins allowed by CORS. Empty disables the CORS layer.
    pub cors_origins: Vec<String>,

    pub store: SharedStore,

    pub stats: Arc<IngestStats>,
}

impl ServerState {
    /// Create new server state.
    pub fn new(store: SharedStore, stats: Arc<IngestStats>) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            cors_origins: Vec::new(),
            store,
            stats,
        }
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}

/// Type alias for shared state in Axum handlers.
pub type AppState = Arc<ServerState>;
