//! Stream store data types
//!
//! Declared stream configuration plus runtime facts written by the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Stream entity: declared configuration + observed runtime facts
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Stream {
    pub id: Uuid,
    pub name: String,
    pub source_url: String,
    // === Geometry ===
    pub location_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub orientation_deg: f64,
    pub view_angle_deg: f64,
    pub view_distance_m: f64,
    pub camera_tilt_deg: f64,
    pub camera_height_m: f64,
    // === Processing tuning ===
    pub grid_size: i32,
    pub win_radius: i32,
    pub threshold: f64,
    // === Rendering tuning ===
    pub arrow_scale: f64,
    pub arrow_opacity: f64,
    pub gradient_intensity: f64,
    pub perspective_ruler_opacity: f64,
    pub show_feed: bool,
    pub show_arrows: bool,
    pub show_magnitude: bool,
    pub show_trails: bool,
    pub show_perspective_ruler: bool,
    // === Desired state ===
    pub is_active: bool,
    // === Runtime facts (written by the reconciler) ===
    pub worker_handle: Option<String>,
    pub worker_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Stored as VARCHAR, converted to/from ConnectionStatus
    pub connection_status: String,
    pub config_fingerprint: Option<String>,
    // === Audit ===
    pub created_at: DateTime<Utc>,
}

impl Stream {
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from(self.connection_status.as_str())
    }
}

/// Worker connection status as observed by the reconciler
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Inactive,
    Starting,
    WorkerDown,
    Error,
    Unknown,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Inactive => "inactive",
            Self::Starting => "starting",
            Self::WorkerDown => "worker_down",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl From<&str> for ConnectionStatus {
    fn from(s: &str) -> Self {
        match s {
            "connected" => Self::Connected,
            "inactive" => Self::Inactive,
            "starting" => Self::Starting,
            "worker_down" => Self::WorkerDown,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime facts written atomically by the reconciler
#[derive(Debug, Clone, Default)]
pub struct RuntimeFacts {
    pub worker_handle: Option<String>,
    pub worker_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub connection_status: ConnectionStatus,
    pub config_fingerprint: Option<String>,
}

fn default_orientation() -> f64 {
    0.0
}
fn default_view_angle() -> f64 {
    60.0
}
fn default_view_distance() -> f64 {
    120.0
}
fn default_tilt() -> f64 {
    15.0
}
fn default_height() -> f64 {
    4.0
}
fn default_grid_size() -> i32 {
    16
}
fn default_win_radius() -> i32 {
    8
}
fn default_threshold() -> f64 {
    1.2
}
fn default_arrow_scale() -> f64 {
    4.0
}
fn default_arrow_opacity() -> f64 {
    90.0
}
fn default_gradient_intensity() -> f64 {
    1.0
}
fn default_ruler_opacity() -> f64 {
    70.0
}
fn default_true() -> bool {
    true
}

/// Stream creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStreamRequest {
    pub name: String,
    pub source_url: String,
    pub location_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default = "default_orientation")]
    pub orientation_deg: f64,
    #[serde(default = "default_view_angle")]
    pub view_angle_deg: f64,
    #[serde(default = "default_view_distance")]
    pub view_distance_m: f64,
    #[serde(default = "default_tilt")]
    pub camera_tilt_deg: f64,
    #[serde(default = "default_height")]
    pub camera_height_m: f64,
    #[serde(default = "default_grid_size")]
    pub grid_size: i32,
    #[serde(default = "default_win_radius")]
    pub win_radius: i32,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_arrow_scale")]
    pub arrow_scale: f64,
    #[serde(default = "default_arrow_opacity")]
    pub arrow_opacity: f64,
    #[serde(default = "default_gradient_intensity")]
    pub gradient_intensity: f64,
    #[serde(default = "default_ruler_opacity")]
    pub perspective_ruler_opacity: f64,
    #[serde(default = "default_true")]
    pub show_feed: bool,
    #[serde(default = "default_true")]
    pub show_arrows: bool,
    #[serde(default)]
    pub show_magnitude: bool,
    #[serde(default)]
    pub show_trails: bool,
    #[serde(default = "default_true")]
    pub show_perspective_ruler: bool,
    #[serde(default)]
    pub is_active: bool,
}

/// Stream update request (absent fields keep their current value)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateStreamRequest {
    pub name: Option<String>,
    pub source_url: Option<String>,
    pub location_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub orientation_deg: Option<f64>,
    pub view_angle_deg: Option<f64>,
    pub view_distance_m: Option<f64>,
    pub camera_tilt_deg: Option<f64>,
    pub camera_height_m: Option<f64>,
    pub grid_size: Option<i32>,
    pub win_radius: Option<i32>,
    pub threshold: Option<f64>,
    pub arrow_scale: Option<f64>,
    pub arrow_opacity: Option<f64>,
    pub gradient_intensity: Option<f64>,
    pub perspective_ruler_opacity: Option<f64>,
    pub show_feed: Option<bool>,
    pub show_arrows: Option<bool>,
    pub show_magnitude: Option<bool>,
    pub show_trails: Option<bool>,
    pub show_perspective_ruler: Option<bool>,
    pub is_active: Option<bool>,
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if value < min || value > max {
        return Err(Error::Validation(format!(
            "{} must be within [{}, {}], got {}",
            field, min, max, value
        )));
    }
    Ok(())
}

/// Validate every declared field of a fully-materialized stream.
///
/// Out-of-range values are rejected rather than clamped so the caller sees
/// exactly which field is wrong.
pub fn validate_declared(stream: &Stream) -> Result<()> {
    if stream.name.is_empty() || stream.name.len() > 255 {
        return Err(Error::Validation("name must be 1-255 characters".to_string()));
    }
    if stream.source_url.len() < 3 {
        return Err(Error::Validation(
            "source_url must be at least 3 characters".to_string(),
        ));
    }
    if let Some(ref loc) = stream.location_name {
        if loc.len() > 512 {
            return Err(Error::Validation(
                "location_name must be at most 512 characters".to_string(),
            ));
        }
    }
    if let Some(lat) = stream.latitude {
        check_range("latitude", lat, -90.0, 90.0)?;
    }
    if let Some(lon) = stream.longitude {
        check_range("longitude", lon, -180.0, 180.0)?;
    }
    if stream.orientation_deg < 0.0 || stream.orientation_deg >= 360.0 {
        return Err(Error::Validation(format!(
            "orientation_deg must be within [0, 360), got {}",
            stream.orientation_deg
        )));
    }
    check_range("view_angle_deg", stream.view_angle_deg, 5.0, 170.0)?;
    check_range("view_distance_m", stream.view_distance_m, 50.0, 1000.0)?;
    check_range("camera_tilt_deg", stream.camera_tilt_deg, -45.0, 89.0)?;
    check_range("camera_height_m", stream.camera_height_m, 0.5, 120.0)?;
    check_range("grid_size", stream.grid_size as f64, 4.0, 128.0)?;
    check_range("win_radius", stream.win_radius as f64, 2.0, 32.0)?;
    check_range("threshold", stream.threshold, 0.0, 100.0)?;
    check_range("arrow_opacity", stream.arrow_opacity, 0.0, 100.0)?;
    check_range(
        "perspective_ruler_opacity",
        stream.perspective_ruler_opacity,
        0.0,
        100.0,
    )?;
    if stream.arrow_scale <= 0.0 {
        return Err(Error::Validation("arrow_scale must be positive".to_string()));
    }
    if stream.gradient_intensity < 0.0 {
        return Err(Error::Validation(
            "gradient_intensity must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// Materialize a create request into a stream row (identity assigned here).
pub fn materialize(req: CreateStreamRequest) -> Stream {
    Stream {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        source_url: req.source_url.trim().to_string(),
        location_name: req.location_name,
        latitude: req.latitude,
        longitude: req.longitude,
        orientation_deg: req.orientation_deg,
        view_angle_deg: req.view_angle_deg,
        view_distance_m: req.view_distance_m,
        camera_tilt_deg: req.camera_tilt_deg,
        camera_height_m: req.camera_height_m,
        grid_size: req.grid_size,
        win_radius: req.win_radius,
        threshold: req.threshold,
        arrow_scale: req.arrow_scale,
        arrow_opacity: req.arrow_opacity,
        gradient_intensity: req.gradient_intensity,
        perspective_ruler_opacity: req.perspective_ruler_opacity,
        show_feed: req.show_feed,
        show_arrows: req.show_arrows,
        show_magnitude: req.show_magnitude,
        show_trails: req.show_trails,
        show_perspective_ruler: req.show_perspective_ruler,
        is_active: req.is_active,
        worker_handle: None,
        worker_started_at: None,
        last_error: None,
        connection_status: ConnectionStatus::Inactive.as_str().to_string(),
        config_fingerprint: None,
        created_at: Utc::now(),
    }
}

/// Apply an update request on top of an existing stream.
pub fn apply_update(current: &Stream, req: &UpdateStreamRequest) -> Stream {
    let mut next = current.clone();
    if let Some(ref v) = req.name {
        next.name = v.trim().to_string();
    }
    if let Some(ref v) = req.source_url {
        next.source_url = v.trim().to_string();
    }
    if req.location_name.is_some() {
        next.location_name = req.location_name.clone();
    }
    if req.latitude.is_some() {
        next.latitude = req.latitude;
    }
    if req.longitude.is_some() {
        next.longitude = req.longitude;
    }
    if let Some(v) = req.orientation_deg {
        next.orientation_deg = v;
    }
    if let Some(v) = req.view_angle_deg {
        next.view_angle_deg = v;
    }
    if let Some(v) = req.view_distance_m {
        next.view_distance_m = v;
    }
    if let Some(v) = req.camera_tilt_deg {
        next.camera_tilt_deg = v;
    }
    if let Some(v) = req.camera_height_m {
        next.camera_height_m = v;
    }
    if let Some(v) = req.grid_size {
        next.grid_size = v;
    }
    if let Some(v) = req.win_radius {
        next.win_radius = v;
    }
    if let Some(v) = req.threshold {
        next.threshold = v;
    }
    if let Some(v) = req.arrow_scale {
        next.arrow_scale = v;
    }
    if let Some(v) = req.arrow_opacity {
        next.arrow_opacity = v;
    }
    if let Some(v) = req.gradient_intensity {
        next.gradient_intensity = v;
    }
    if let Some(v) = req.perspective_ruler_opacity {
        next.perspective_ruler_opacity = v;
    }
    if let Some(v) = req.show_feed {
        next.show_feed = v;
    }
    if let Some(v) = req.show_arrows {
        next.show_arrows = v;
    }
    if let Some(v) = req.show_magnitude {
        next.show_magnitude = v;
    }
    if let Some(v) = req.show_trails {
        next.show_trails = v;
    }
    if let Some(v) = req.show_perspective_ruler {
        next.show_perspective_ruler = v;
    }
    if let Some(v) = req.is_active {
        next.is_active = v;
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_request() -> CreateStreamRequest {
        serde_json::from_value(serde_json::json!({
            "name": "gate-cam",
            "source_url": "rtsp://10.0.0.4/stream1"
        }))
        .unwrap()
    }

    #[test]
    fn test_create_defaults() {
        let req = minimal_request();
        assert_eq!(req.grid_size, 16);
        assert_eq!(req.win_radius, 8);
        assert!((req.threshold - 1.2).abs() < f64::EPSILON);
        assert!(req.show_feed);
        assert!(!req.show_trails);
        assert!(req.show_perspective_ruler);
        assert!(!req.is_active);
    }

    #[test]
    fn test_materialized_defaults_pass_validation() {
        let stream = materialize(minimal_request());
        assert!(validate_declared(&stream).is_ok());
        assert_eq!(stream.status(), ConnectionStatus::Inactive);
        assert!(stream.worker_handle.is_none());
    }

    #[test]
    fn test_out_of_range_grid_size_rejected() {
        let mut req = minimal_request();
        req.grid_size = 2;
        let err = validate_declared(&materialize(req)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_orientation_full_circle_rejected() {
        let mut req = minimal_request();
        req.orientation_deg = 360.0;
        assert!(validate_declared(&materialize(req)).is_err());
    }

    #[test]
    fn test_latitude_bounds() {
        let mut req = minimal_request();
        req.latitude = Some(90.0);
        assert!(validate_declared(&materialize(req.clone())).is_ok());
        req.latitude = Some(90.5);
        assert!(validate_declared(&materialize(req)).is_err());
    }

    #[test]
    fn test_apply_update_keeps_absent_fields() {
        let stream = materialize(minimal_request());
        let update = UpdateStreamRequest {
            grid_size: Some(32),
            ..Default::default()
        };
        let next = apply_update(&stream, &update);
        assert_eq!(next.grid_size, 32);
        assert_eq!(next.name, stream.name);
        assert_eq!(next.source_url, stream.source_url);
        assert_eq!(next.win_radius, stream.win_radius);
    }

    #[test]
    fn test_connection_status_round_trip() {
        for status in [
            ConnectionStatus::Connected,
            ConnectionStatus::Inactive,
            ConnectionStatus::Starting,
            ConnectionStatus::WorkerDown,
            ConnectionStatus::Error,
            ConnectionStatus::Unknown,
        ] {
            assert_eq!(ConnectionStatus::from(status.as_str()), status);
        }
        assert_eq!(ConnectionStatus::from("bogus"), ConnectionStatus::Unknown);
    }
}
