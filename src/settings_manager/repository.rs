//! Settings repository

use super::types::SystemSettings;
use crate::error::{Error, Result};
use sqlx::PgPool;

/// Settings repository for the singleton row
#[derive(Clone)]
pub struct SettingsRepository {
    pool: PgPool,
}

impl SettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    const SETTINGS_COLUMNS: &'static str = r#"
        id, live_preview_fps, live_preview_jpeg_quality,
        live_preview_max_width, orientation_offset_deg, updated_at
    "#;

    /// Load the singleton row (bootstrap inserts it if absent)
    pub async fn get(&self) -> Result<SystemSettings> {
        let query = format!(
            "SELECT {} FROM system_settings WHERE id = 1",
            Self::SETTINGS_COLUMNS
        );
        sqlx::query_as::<_, SystemSettings>(&query)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::Internal("system_settings row missing".to_string()))
    }

    /// Persist new values on the singleton row
    pub async fn update(&self, next: &SystemSettings) -> Result<SystemSettings> {
        sqlx::query(
            r#"
            UPDATE system_settings SET
                live_preview_fps = $1,
                live_preview_jpeg_quality = $2,
                live_preview_max_width = $3,
                orientation_offset_deg = $4,
                updated_at = NOW()
            WHERE id = 1
            "#,
        )
        .bind(next.live_preview_fps)
        .bind(next.live_preview_jpeg_quality)
        .bind(next.live_preview_max_width)
        .bind(next.orientation_offset_deg)
        .execute(&self.pool)
        .await?;

        self.get().await
    }
}
