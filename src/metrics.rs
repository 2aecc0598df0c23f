//! Process metrics
//!
//! Installs the Prometheus recorder once and renders it for `GET /metrics`.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        panic!("metrics already initialized");
    }

    metrics::describe_gauge!(
        "vectorflow_managed_streams",
        "Total stream records managed by the control plane"
    );
    metrics::describe_gauge!(
        "vectorflow_active_streams",
        "Number of streams with a desired-active state"
    );
    metrics::describe_gauge!(
        "vectorflow_ws_subscribers",
        "Connected WebSocket frame subscribers"
    );
    metrics::describe_counter!(
        "vectorflow_frames_forwarded_total",
        "Frames forwarded to the subscription hub"
    );
    metrics::describe_counter!(
        "vectorflow_frames_throttled_total",
        "Frames dropped by the per-stream FPS cap"
    );
    metrics::describe_counter!(
        "vectorflow_frames_dropped_total",
        "Frames dropped by the per-subscriber overflow policy"
    );

    tracing::info!("Prometheus metrics initialized");
}

pub fn render() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}
