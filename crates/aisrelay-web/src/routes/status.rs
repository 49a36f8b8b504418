//! Service status routes.
//!
//! # Endpoints
//!
//! ### `GET /health`
//! Liveness check with the service version and current Unix time.
//!
//! ### `GET /ais/status`
//! Snapshot of the stream client statistics.

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use serde::Serialize;

use aisrelay_providers::StatsSnapshot;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: String,

    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

/// Create status routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/ais/status", get(ais_status))
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        version: state.version.clone(),
        timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
    })
}

/// GET /ais/status
async fn ais_status(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use aisrelay_core::MemoryStore;
    use aisrelay_providers::{ConnectionState, IngestStats, SharedStore};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    use crate::{create_router, ServerState};

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn state(stats: Arc<IngestStats>) -> Arc<ServerState> {
        let store: SharedStore = Arc::new(RwLock::new(MemoryStore::new()));
        Arc::new(ServerState::new(store, stats))
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(state(Arc::new(IngestStats::new())));
        let (status, body) = get_json(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_ais_status() {
        let stats = Arc::new(IngestStats::new());
        stats.set_enabled(true);
        stats.set_running(true);
        stats.set_state(ConnectionState::Backoff);
        stats.record_message();
        stats.record_message();
        stats.record_position();

        let app = create_router(state(stats));
        let (status, body) = get_json(app, "/ais/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], true);
        assert_eq!(body["running"], true);
        assert_eq!(body["connected"], false);
        assert_eq!(body["state"], "backoff");
        assert_eq!(body["messages_received"], 2);
        assert_eq!(body["positions_processed"], 1);
    }
}
