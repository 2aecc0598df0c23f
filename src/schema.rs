//! Idempotent schema bootstrap
//!
//! The process must start cleanly against an empty database and against a
//! database created by an earlier build, so every statement is create-if-absent
//! or add-if-absent. Runtime-fact columns are added separately because early
//! deployments predate them.

use crate::error::Result;
use sqlx::PgPool;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS camera_streams (
    id UUID PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    source_url TEXT NOT NULL,
    location_name VARCHAR(512),
    latitude DOUBLE PRECISION,
    longitude DOUBLE PRECISION,
    orientation_deg DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    view_angle_deg DOUBLE PRECISION NOT NULL DEFAULT 60.0,
    view_distance_m DOUBLE PRECISION NOT NULL DEFAULT 120.0,
    camera_tilt_deg DOUBLE PRECISION NOT NULL DEFAULT 15.0,
    camera_height_m DOUBLE PRECISION NOT NULL DEFAULT 4.0,
    grid_size INTEGER NOT NULL DEFAULT 16,
    win_radius INTEGER NOT NULL DEFAULT 8,
    threshold DOUBLE PRECISION NOT NULL DEFAULT 1.2,
    arrow_scale DOUBLE PRECISION NOT NULL DEFAULT 4.0,
    arrow_opacity DOUBLE PRECISION NOT NULL DEFAULT 90.0,
    gradient_intensity DOUBLE PRECISION NOT NULL DEFAULT 1.0,
    perspective_ruler_opacity DOUBLE PRECISION NOT NULL DEFAULT 70.0,
    show_feed BOOLEAN NOT NULL DEFAULT TRUE,
    show_arrows BOOLEAN NOT NULL DEFAULT TRUE,
    show_magnitude BOOLEAN NOT NULL DEFAULT FALSE,
    show_trails BOOLEAN NOT NULL DEFAULT FALSE,
    show_perspective_ruler BOOLEAN NOT NULL DEFAULT TRUE,
    is_active BOOLEAN NOT NULL DEFAULT FALSE,
    worker_handle VARCHAR(255),
    worker_started_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

ALTER TABLE camera_streams ADD COLUMN IF NOT EXISTS last_error TEXT;
ALTER TABLE camera_streams ADD COLUMN IF NOT EXISTS connection_status VARCHAR(32) NOT NULL DEFAULT 'unknown';
ALTER TABLE camera_streams ADD COLUMN IF NOT EXISTS config_fingerprint VARCHAR(64);

CREATE UNIQUE INDEX IF NOT EXISTS idx_camera_streams_worker_handle
    ON camera_streams(worker_handle) WHERE worker_handle IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_camera_streams_created_at ON camera_streams(created_at DESC);

CREATE TABLE IF NOT EXISTS system_settings (
    id INTEGER PRIMARY KEY,
    live_preview_fps DOUBLE PRECISION NOT NULL DEFAULT 6.0,
    live_preview_jpeg_quality INTEGER NOT NULL DEFAULT 65,
    live_preview_max_width INTEGER NOT NULL DEFAULT 960,
    orientation_offset_deg DOUBLE PRECISION NOT NULL DEFAULT 0.0,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS alert_webhook_events (
    id BIGSERIAL PRIMARY KEY,
    receiver VARCHAR(255),
    group_key TEXT,
    notification_status VARCHAR(64),
    alert_status VARCHAR(64),
    alert_name VARCHAR(255),
    alert_uid VARCHAR(255),
    severity VARCHAR(64),
    stream_name VARCHAR(255),
    fingerprint VARCHAR(255),
    summary TEXT,
    description TEXT,
    starts_at TIMESTAMPTZ,
    ends_at TIMESTAMPTZ,
    labels JSONB NOT NULL DEFAULT '{}'::jsonb,
    annotations JSONB NOT NULL DEFAULT '{}'::jsonb,
    "values" JSONB NOT NULL DEFAULT '{}'::jsonb,
    raw_payload JSONB NOT NULL DEFAULT '{}'::jsonb,
    received_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

ALTER TABLE alert_webhook_events ADD COLUMN IF NOT EXISTS group_identifier VARCHAR(1024);

CREATE INDEX IF NOT EXISTS idx_alert_events_received_at ON alert_webhook_events(received_at DESC);
CREATE INDEX IF NOT EXISTS idx_alert_events_alert_name ON alert_webhook_events(alert_name);
CREATE INDEX IF NOT EXISTS idx_alert_events_fingerprint ON alert_webhook_events(fingerprint);
CREATE INDEX IF NOT EXISTS idx_alert_events_group_identifier ON alert_webhook_events(group_identifier);

CREATE TABLE IF NOT EXISTS alert_group_states (
    identifier VARCHAR(1024) PRIMARY KEY,
    resolved BOOLEAN NOT NULL DEFAULT FALSE,
    resolved_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

INSERT INTO system_settings (id) VALUES (1) ON CONFLICT (id) DO NOTHING;
"#;

/// Apply the schema. Safe to run on every process start.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    tracing::info!("Database schema ensured");
    Ok(())
}
