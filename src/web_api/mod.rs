//! WebAPI - HTTP and WebSocket surface
//!
//! ## Responsibilities
//!
//! - HTTP routes (streams, settings, alerts, metrics)
//! - WebSocket frame streaming
//! - Request validation and status-code mapping
//!
//! Mutations take the stream's serialization lock inside the reconciler;
//! reads go straight to the store and may return slightly stale runtime facts.

mod frame_routes;
mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(_state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
