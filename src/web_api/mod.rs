//! WebAPI - REST Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP routes over the planner, scheduler, facade, config store and HLS
//!   gateway
//! - Request validation happens in the services; handlers stay thin

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let detector_ok = state.detector.health_check().await.unwrap_or(false);
    let hls_children = state.hls.live_count().await;

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "detector_connected": detector_ok,
        "hls_children": hls_children,
        "active_captures": state.engine.active_count(),
    }))
}
