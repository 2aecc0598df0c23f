//! Settings data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Global system settings (singleton row, id = 1)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SystemSettings {
    pub id: i32,
    pub live_preview_fps: f64,
    pub live_preview_jpeg_quality: i32,
    pub live_preview_max_width: i32,
    pub orientation_offset_deg: f64,
    pub updated_at: DateTime<Utc>,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            id: 1,
            live_preview_fps: 6.0,
            live_preview_jpeg_quality: 65,
            live_preview_max_width: 960,
            orientation_offset_deg: 0.0,
            updated_at: Utc::now(),
        }
    }
}

/// Settings update request (absent fields keep their current value)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateSettingsRequest {
    pub live_preview_fps: Option<f64>,
    pub live_preview_jpeg_quality: Option<i32>,
    pub live_preview_max_width: Option<i32>,
    pub orientation_offset_deg: Option<f64>,
    /// Restart active workers so they pick up the new throttle parameters
    #[serde(default)]
    pub restart_workers: bool,
}

/// Per-stream restart failure reported back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartFailure {
    pub stream_id: Uuid,
    pub error: String,
}

/// Settings update response with restart outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsUpdateReport {
    #[serde(flatten)]
    pub settings: SystemSettings,
    pub workers_restarted: u32,
    pub restart_errors: Vec<RestartFailure>,
}

/// Validate and merge an update into the current settings
pub fn apply_settings_update(
    current: &SystemSettings,
    req: &UpdateSettingsRequest,
) -> Result<SystemSettings> {
    let mut next = current.clone();
    if let Some(fps) = req.live_preview_fps {
        if !(0.5..=30.0).contains(&fps) {
            return Err(Error::Validation(format!(
                "live_preview_fps must be within [0.5, 30], got {}",
                fps
            )));
        }
        next.live_preview_fps = fps;
    }
    if let Some(quality) = req.live_preview_jpeg_quality {
        if !(30..=95).contains(&quality) {
            return Err(Error::Validation(format!(
                "live_preview_jpeg_quality must be within [30, 95], got {}",
                quality
            )));
        }
        next.live_preview_jpeg_quality = quality;
    }
    if let Some(width) = req.live_preview_max_width {
        if width < 0 {
            return Err(Error::Validation(
                "live_preview_max_width must not be negative (0 disables resize)".to_string(),
            ));
        }
        next.live_preview_max_width = width;
    }
    if let Some(offset) = req.orientation_offset_deg {
        if !(-360.0..=360.0).contains(&offset) {
            return Err(Error::Validation(format!(
                "orientation_offset_deg must be within [-360, 360], got {}",
                offset
            )));
        }
        next.orientation_offset_deg = offset;
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_update_merges_only_present_fields() {
        let current = SystemSettings::default();
        let req = UpdateSettingsRequest {
            live_preview_fps: Some(2.0),
            ..Default::default()
        };
        let next = apply_settings_update(&current, &req).unwrap();
        assert!((next.live_preview_fps - 2.0).abs() < f64::EPSILON);
        assert_eq!(next.live_preview_jpeg_quality, 65);
        assert_eq!(next.live_preview_max_width, 960);
    }

    #[test]
    fn test_fps_out_of_range_rejected() {
        let current = SystemSettings::default();
        for fps in [0.4, 30.1, -1.0] {
            let req = UpdateSettingsRequest {
                live_preview_fps: Some(fps),
                ..Default::default()
            };
            assert!(apply_settings_update(&current, &req).is_err());
        }
    }

    #[test]
    fn test_zero_width_disables_resize() {
        let current = SystemSettings::default();
        let req = UpdateSettingsRequest {
            live_preview_max_width: Some(0),
            ..Default::default()
        };
        assert_eq!(
            apply_settings_update(&current, &req)
                .unwrap()
                .live_preview_max_width,
            0
        );
    }
}
