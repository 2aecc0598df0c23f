//! API Routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::alert_ingest::UpsertGroupStateRequest;
use crate::error::Result;
use crate::models::WorkerLogsResponse;
use crate::settings_manager::{SettingsUpdateReport, UpdateSettingsRequest};
use crate::state::AppState;
use crate::stream_store::{CreateStreamRequest, UpdateStreamRequest};

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(super::health_check))
        // Streams
        .route("/streams", get(list_streams))
        .route("/streams", post(create_stream))
        .route("/streams/:id", get(get_stream))
        .route("/streams/:id", put(update_stream))
        .route("/streams/:id", delete(delete_stream))
        .route("/streams/:id/activate", post(activate_stream))
        .route("/streams/:id/deactivate", post(deactivate_stream))
        .route("/streams/:id/worker-logs", get(worker_logs))
        // Settings
        .route("/settings/system", get(get_settings))
        .route("/settings/system", put(update_settings))
        // Alerts
        .route("/alerts/webhook", post(alerts_webhook))
        .route("/alerts", get(list_alerts))
        .route("/alerts/groups", get(alert_groups))
        .route("/alerts/group-states", get(list_group_states))
        .route("/alerts/group-states", post(upsert_group_state))
        // Metrics
        .route("/metrics", get(metrics_endpoint))
        // Frames
        .route("/ws/frames", get(super::frame_routes::ws_frames))
        .with_state(state)
}

// ========================================
// Stream Handlers
// ========================================

async fn list_streams(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let streams = state.streams.service().list().await?;
    Ok(Json(streams))
}

async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let stream = state.streams.service().get(id).await?;
    Ok(Json(stream))
}

async fn create_stream(
    State(state): State<AppState>,
    Json(req): Json<CreateStreamRequest>,
) -> Result<impl IntoResponse> {
    let wants_worker = req.is_active;
    let stream = state.streams.service().create(req).await?;

    // The record is committed either way; activation failures surface to the
    // caller and leave the stream in error for the reconcile loop to retry.
    let stream = if wants_worker {
        state.reconciler.activate(stream.id).await?
    } else {
        stream
    };

    Ok((StatusCode::CREATED, Json(stream)))
}

async fn update_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStreamRequest>,
) -> Result<impl IntoResponse> {
    let (before, after) = state.streams.service().update(id, &req).await?;
    state.reconciler.apply_config_change(&before, &after).await?;
    let stream = state.streams.service().get(id).await?;
    Ok(Json(stream))
}

async fn delete_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.streams.service().delete(id).await?;
    state.reconciler.forget(id).await;
    state.frame_activity.forget(id);
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let stream = state.reconciler.activate(id).await?;
    Ok(Json(stream))
}

async fn deactivate_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let stream = state.reconciler.deactivate(id).await?;
    Ok(Json(stream))
}

#[derive(Deserialize)]
struct WorkerLogsQuery {
    tail: Option<usize>,
}

async fn worker_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<WorkerLogsQuery>,
) -> Result<impl IntoResponse> {
    let stream = state.streams.service().get(id).await?;
    let tail = query.tail.unwrap_or(100).clamp(1, 1000);

    let Some(handle) = stream.worker_handle else {
        return Ok(Json(WorkerLogsResponse {
            worker_status: stream.connection_status,
            worker_container_name: None,
            logs: Vec::new(),
            error: None,
        }));
    };

    let (worker_status, inspect_error) = match state.driver.inspect(&handle).await {
        Ok(status) => (status.state.as_str().to_string(), None),
        Err(e) => ("unknown".to_string(), Some(e.message)),
    };

    let (logs, error) = match state.driver.tail(&handle, tail).await {
        Ok(lines) => (lines, inspect_error),
        Err(e) => (Vec::new(), Some(e.message)),
    };

    Ok(Json(WorkerLogsResponse {
        worker_status,
        worker_container_name: Some(handle),
        logs,
        error,
    }))
}

// ========================================
// Settings Handlers
// ========================================

async fn get_settings(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.settings.current()))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<impl IntoResponse> {
    let settings = state.settings.update(&req).await?;

    let (workers_restarted, restart_errors) = if req.restart_workers {
        state.reconciler.restart_active_workers().await?
    } else {
        (0, Vec::new())
    };

    Ok(Json(SettingsUpdateReport {
        settings,
        workers_restarted,
        restart_errors,
    }))
}

// ========================================
// Alert Handlers
// ========================================

async fn alerts_webhook(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse> {
    state.alerts.ingest(payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct AlertsQuery {
    limit: Option<i64>,
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<impl IntoResponse> {
    let events = state.alerts.list_events(query.limit.unwrap_or(100)).await?;
    Ok(Json(events))
}

async fn alert_groups(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let groups = state.alerts.groups().await?;
    Ok(Json(groups))
}

async fn list_group_states(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let states = state.alerts.list_group_states().await?;
    Ok(Json(states))
}

async fn upsert_group_state(
    State(state): State<AppState>,
    Json(req): Json<UpsertGroupStateRequest>,
) -> Result<impl IntoResponse> {
    let record = state.alerts.upsert_group_state(&req).await?;
    Ok(Json(record))
}

// ========================================
// Metrics Handler
// ========================================

async fn metrics_endpoint(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let (total, active) = state.streams.service().counts().await?;
    metrics::gauge!("vectorflow_managed_streams").set(total as f64);
    metrics::gauge!("vectorflow_active_streams").set(active as f64);
    metrics::gauge!("vectorflow_ws_subscribers").set(state.hub.connection_count() as f64);
    Ok(crate::metrics::render())
}
