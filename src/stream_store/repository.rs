//! Stream store repository
//!
//! Database access layer for stream records

use super::types::*;
use crate::error::{Error, Result};
use sqlx::PgPool;
use uuid::Uuid;

/// Stream repository for database operations
#[derive(Clone)]
pub struct StreamRepository {
    pool: PgPool,
}

impl StreamRepository {
    /// Create new repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stream SELECT columns
    const STREAM_COLUMNS: &'static str = r#"
        id, name, source_url, location_name, latitude, longitude,
        orientation_deg, view_angle_deg, view_distance_m, camera_tilt_deg, camera_height_m,
        grid_size, win_radius, threshold,
        arrow_scale, arrow_opacity, gradient_intensity, perspective_ruler_opacity,
        show_feed, show_arrows, show_magnitude, show_trails, show_perspective_ruler,
        is_active, worker_handle, worker_started_at, last_error, connection_status,
        config_fingerprint, created_at
    "#;

    /// Get all streams, newest first
    pub async fn get_all(&self) -> Result<Vec<Stream>> {
        let query = format!(
            "SELECT {} FROM camera_streams ORDER BY created_at DESC",
            Self::STREAM_COLUMNS
        );
        let streams = sqlx::query_as::<_, Stream>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(streams)
    }

    /// Get stream by id
    pub async fn get(&self, id: Uuid) -> Result<Option<Stream>> {
        let query = format!(
            "SELECT {} FROM camera_streams WHERE id = $1",
            Self::STREAM_COLUMNS
        );
        let stream = sqlx::query_as::<_, Stream>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(stream)
    }

    /// Insert a fully-materialized stream row
    pub async fn insert(&self, stream: &Stream) -> Result<Stream> {
        sqlx::query(
            r#"
            INSERT INTO camera_streams (
                id, name, source_url, location_name, latitude, longitude,
                orientation_deg, view_angle_deg, view_distance_m, camera_tilt_deg, camera_height_m,
                grid_size, win_radius, threshold,
                arrow_scale, arrow_opacity, gradient_intensity, perspective_ruler_opacity,
                show_feed, show_arrows, show_magnitude, show_trails, show_perspective_ruler,
                is_active, connection_status, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10, $11,
                $12, $13, $14,
                $15, $16, $17, $18,
                $19, $20, $21, $22, $23,
                $24, $25, $26
            )
            "#,
        )
        .bind(stream.id)
        .bind(&stream.name)
        .bind(&stream.source_url)
        .bind(&stream.location_name)
        .bind(stream.latitude)
        .bind(stream.longitude)
        .bind(stream.orientation_deg)
        .bind(stream.view_angle_deg)
        .bind(stream.view_distance_m)
        .bind(stream.camera_tilt_deg)
        .bind(stream.camera_height_m)
        .bind(stream.grid_size)
        .bind(stream.win_radius)
        .bind(stream.threshold)
        .bind(stream.arrow_scale)
        .bind(stream.arrow_opacity)
        .bind(stream.gradient_intensity)
        .bind(stream.perspective_ruler_opacity)
        .bind(stream.show_feed)
        .bind(stream.show_arrows)
        .bind(stream.show_magnitude)
        .bind(stream.show_trails)
        .bind(stream.show_perspective_ruler)
        .bind(stream.is_active)
        .bind(&stream.connection_status)
        .bind(stream.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        self.get(stream.id)
            .await?
            .ok_or_else(|| Error::NotFound("Stream not found after insert".to_string()))
    }

    /// Update the declared (mutable) fields of a stream
    pub async fn update_declared(&self, stream: &Stream) -> Result<Stream> {
        sqlx::query(
            r#"
            UPDATE camera_streams SET
                name = $2, source_url = $3, location_name = $4, latitude = $5, longitude = $6,
                orientation_deg = $7, view_angle_deg = $8, view_distance_m = $9,
                camera_tilt_deg = $10, camera_height_m = $11,
                grid_size = $12, win_radius = $13, threshold = $14,
                arrow_scale = $15, arrow_opacity = $16, gradient_intensity = $17,
                perspective_ruler_opacity = $18,
                show_feed = $19, show_arrows = $20, show_magnitude = $21,
                show_trails = $22, show_perspective_ruler = $23,
                is_active = $24
            WHERE id = $1
            "#,
        )
        .bind(stream.id)
        .bind(&stream.name)
        .bind(&stream.source_url)
        .bind(&stream.location_name)
        .bind(stream.latitude)
        .bind(stream.longitude)
        .bind(stream.orientation_deg)
        .bind(stream.view_angle_deg)
        .bind(stream.view_distance_m)
        .bind(stream.camera_tilt_deg)
        .bind(stream.camera_height_m)
        .bind(stream.grid_size)
        .bind(stream.win_radius)
        .bind(stream.threshold)
        .bind(stream.arrow_scale)
        .bind(stream.arrow_opacity)
        .bind(stream.gradient_intensity)
        .bind(stream.perspective_ruler_opacity)
        .bind(stream.show_feed)
        .bind(stream.show_arrows)
        .bind(stream.show_magnitude)
        .bind(stream.show_trails)
        .bind(stream.show_perspective_ruler)
        .bind(stream.is_active)
        .execute(&self.pool)
        .await?;

        self.get(stream.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Stream {} not found", stream.id)))
    }

    /// Set the desired-state flag only
    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<()> {
        sqlx::query("UPDATE camera_streams SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Write runtime facts. Used exclusively by the reconciler.
    pub async fn set_runtime_facts(&self, id: Uuid, facts: &RuntimeFacts) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE camera_streams SET
                worker_handle = $2,
                worker_started_at = $3,
                last_error = $4,
                connection_status = $5,
                config_fingerprint = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&facts.worker_handle)
        .bind(facts.worker_started_at)
        .bind(&facts.last_error)
        .bind(facts.connection_status.as_str())
        .bind(&facts.config_fingerprint)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;
        Ok(())
    }

    /// Update the connection status without touching the handle
    pub async fn set_status(
        &self,
        id: Uuid,
        status: ConnectionStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE camera_streams SET connection_status = $2, last_error = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a stream row
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM camera_streams WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Count all / active streams (for process metrics)
    pub async fn counts(&self) -> Result<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT count(*), count(*) FILTER (WHERE is_active) FROM camera_streams",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}

/// Postgres unique violations surface as Conflict, not 500
fn map_unique_violation(e: sqlx::Error) -> Error {
    if let sqlx::Error::Database(ref db) = e {
        if db.code().as_deref() == Some("23505") {
            return Error::Conflict(format!("unique constraint violated: {}", db.message()));
        }
    }
    Error::Database(e)
}
