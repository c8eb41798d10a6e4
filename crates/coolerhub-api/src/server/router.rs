//! Route table.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::types::{MAX_REQUEST_BODY_SIZE, ServerState};
use crate::handlers::{basic, devices};

/// Build the router with every route and middleware layer.
pub fn create_router(state: ServerState) -> Router {
    let device_routes = Router::new()
        .route("/devices", get(devices::list_devices_handler))
        .route(
            "/devices/:id",
            get(devices::get_device_handler).post(devices::post_reading_handler),
        )
        // Legacy paths
        .route("/water_coolers", get(devices::list_devices_handler))
        .route(
            "/water_coolers/:id",
            get(devices::get_device_handler).post(devices::post_reading_handler),
        )
        .route("/statuses", get(devices::statuses_handler));

    let public_routes = Router::new()
        .route("/api/health", get(basic::health_handler))
        .route("/api/health/status", get(basic::health_status_handler));

    public_routes
        .merge(device_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
