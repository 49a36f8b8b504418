//! HTTP route handlers for the relay.

pub mod status;
pub mod vessels;

use crate::AppState;
use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

/// Create the main Axum router with all routes.
///
/// Routes are organized as:
/// - `/health`, `/ais/status` - Service status
/// - `/api/v1/vessels` - Vessel queries
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);

    let router = Router::new()
        .merge(status::routes())
        .nest("/api/v1/vessels", vessels::routes())
        .with_state(state);

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// Build the CORS layer for the configured origins.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(allowed)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}
