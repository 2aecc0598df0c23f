//! Config fingerprint
//!
//! Stable hash over the worker-observable subset of a stream's configuration
//! plus the global settings snapshot the worker consumes. Two streams with the
//! same fingerprint run byte-identical workers; a fingerprint change while
//! active means restart.

use crate::settings_manager::SystemSettings;
use crate::stream_store::Stream;
use sha1::{Digest, Sha1};

/// Compute the config fingerprint (hex sha1)
pub fn config_fingerprint(stream: &Stream, settings: &SystemSettings) -> String {
    // Canonical field order; floats rendered via Display so the same value
    // always serializes the same way.
    let canonical = format!(
        "v1|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
        stream.name,
        stream.source_url,
        stream.latitude.map(|v| v.to_string()).unwrap_or_default(),
        stream.longitude.map(|v| v.to_string()).unwrap_or_default(),
        stream.orientation_deg,
        stream.view_angle_deg,
        stream.view_distance_m,
        stream.camera_tilt_deg,
        stream.camera_height_m,
        stream.grid_size,
        stream.win_radius,
        stream.threshold,
        stream.arrow_scale,
        stream.arrow_opacity,
        stream.gradient_intensity,
        stream.perspective_ruler_opacity,
        stream.show_feed,
        stream.show_arrows,
        stream.show_magnitude,
        stream.show_trails,
        stream.show_perspective_ruler,
        settings.live_preview_fps,
        settings.live_preview_jpeg_quality,
        settings.live_preview_max_width,
    );

    let digest = Sha1::digest(canonical.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_store::{materialize, CreateStreamRequest};

    fn sample() -> (Stream, SystemSettings) {
        let req: CreateStreamRequest = serde_json::from_value(serde_json::json!({
            "name": "gate-cam",
            "source_url": "rtsp://10.0.0.4/stream1"
        }))
        .unwrap();
        (materialize(req), SystemSettings::default())
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let (stream, settings) = sample();
        assert_eq!(
            config_fingerprint(&stream, &settings),
            config_fingerprint(&stream, &settings)
        );
        assert_eq!(config_fingerprint(&stream, &settings).len(), 40);
    }

    #[test]
    fn test_tuning_change_changes_fingerprint() {
        let (mut stream, settings) = sample();
        let before = config_fingerprint(&stream, &settings);
        stream.grid_size = 32;
        assert_ne!(before, config_fingerprint(&stream, &settings));
    }

    #[test]
    fn test_settings_snapshot_is_observable() {
        let (stream, mut settings) = sample();
        let before = config_fingerprint(&stream, &settings);
        settings.live_preview_fps = 2.0;
        assert_ne!(before, config_fingerprint(&stream, &settings));
    }

    #[test]
    fn test_runtime_facts_do_not_affect_fingerprint() {
        let (mut stream, settings) = sample();
        let before = config_fingerprint(&stream, &settings);
        stream.worker_handle = Some("worker-x".to_string());
        stream.last_error = Some("boom".to_string());
        stream.connection_status = "error".to_string();
        assert_eq!(before, config_fingerprint(&stream, &settings));
    }

    #[test]
    fn test_ui_only_settings_excluded() {
        let (stream, mut settings) = sample();
        let before = config_fingerprint(&stream, &settings);
        settings.orientation_offset_deg = 90.0;
        assert_eq!(before, config_fingerprint(&stream, &settings));
    }
}
