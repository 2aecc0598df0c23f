//! RuntimeDriver - uniform interface over the worker runtimes
//!
//! ## Responsibilities
//!
//! - Start/stop/inspect/tail workers behind one trait
//! - Container variant (docker CLI) and pod variant (kube Deployment)
//! - Idempotent start and stop; typed errors carrying retryability
//!
//! Every call is bounded by a deadline so reconciler locks are never held
//! across a hung runtime.

mod docker;
mod kubernetes;

pub use docker::DockerDriver;
pub use kubernetes::KubeDriver;

use crate::settings_manager::SystemSettings;
use crate::state::AppConfig;
use crate::stream_store::Stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Absolute deadlines for driver calls
pub const START_DEADLINE: Duration = Duration::from_secs(30);
pub const STOP_DEADLINE: Duration = Duration::from_secs(15);
pub const INSPECT_DEADLINE: Duration = Duration::from_secs(5);

/// Worker state as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Starting,
    Exited,
    Missing,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Starting => "starting",
            Self::Exited => "exited",
            Self::Missing => "missing",
        }
    }
}

/// Inspect result
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Typed driver error with retryability
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    pub retryable: bool,
    pub message: String,
}

impl DriverError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

impl From<DriverError> for crate::error::Error {
    fn from(e: DriverError) -> Self {
        if e.retryable {
            crate::error::Error::RuntimeUnavailable(e.message)
        } else {
            crate::error::Error::Internal(e.message)
        }
    }
}

/// Everything a worker needs to run, independent of the runtime variant
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub stream_id: Uuid,
    pub handle: String,
    pub env: Vec<(String, String)>,
}

impl WorkerSpec {
    /// Deterministic handle for a stream
    pub fn handle_for(stream_id: Uuid) -> String {
        format!("worker-{}", stream_id)
    }

    /// Per-stream frame channel
    pub fn frame_channel(stream_id: Uuid) -> String {
        format!("frames/{}", stream_id)
    }

    /// Build the full worker environment from the stream configuration, the
    /// current settings snapshot, and the shared infrastructure endpoints.
    pub fn build(stream: &Stream, settings: &SystemSettings, config: &AppConfig) -> Self {
        let mut env: Vec<(String, String)> = vec![
            ("STREAM_ID".into(), stream.id.to_string()),
            ("STREAM_NAME".into(), stream.name.clone()),
            ("SOURCE_URL".into(), stream.source_url.clone()),
            ("GRID_SIZE".into(), stream.grid_size.to_string()),
            ("WIN_RADIUS".into(), stream.win_radius.to_string()),
            ("THRESHOLD".into(), stream.threshold.to_string()),
            ("ARROW_SCALE".into(), stream.arrow_scale.to_string()),
            ("ARROW_OPACITY".into(), stream.arrow_opacity.to_string()),
            (
                "GRADIENT_INTENSITY".into(),
                stream.gradient_intensity.to_string(),
            ),
            (
                "PERSPECTIVE_RULER_OPACITY".into(),
                stream.perspective_ruler_opacity.to_string(),
            ),
            ("SHOW_FEED".into(), stream.show_feed.to_string()),
            ("SHOW_ARROWS".into(), stream.show_arrows.to_string()),
            ("SHOW_MAGNITUDE".into(), stream.show_magnitude.to_string()),
            ("SHOW_TRAILS".into(), stream.show_trails.to_string()),
            (
                "SHOW_PERSPECTIVE_RULER".into(),
                stream.show_perspective_ruler.to_string(),
            ),
            ("ORIENTATION_DEG".into(), stream.orientation_deg.to_string()),
            ("VIEW_ANGLE_DEG".into(), stream.view_angle_deg.to_string()),
            ("VIEW_DISTANCE_M".into(), stream.view_distance_m.to_string()),
            ("CAMERA_TILT_DEG".into(), stream.camera_tilt_deg.to_string()),
            ("CAMERA_HEIGHT_M".into(), stream.camera_height_m.to_string()),
            (
                "LIVE_PREVIEW_FPS".into(),
                settings.live_preview_fps.to_string(),
            ),
            (
                "LIVE_PREVIEW_JPEG_QUALITY".into(),
                settings.live_preview_jpeg_quality.to_string(),
            ),
            (
                "LIVE_PREVIEW_MAX_WIDTH".into(),
                settings.live_preview_max_width.to_string(),
            ),
            ("REDIS_URL".into(), config.redis_url.clone()),
            ("FRAME_CHANNEL".into(), Self::frame_channel(stream.id)),
            (
                "METRICS_PORT".into(),
                config.worker_metrics_port.to_string(),
            ),
        ];

        if let Some(lat) = stream.latitude {
            env.push(("LATITUDE".into(), lat.to_string()));
        }
        if let Some(lon) = stream.longitude {
            env.push(("LONGITUDE".into(), lon.to_string()));
        }

        Self {
            stream_id: stream.id,
            handle: Self::handle_for(stream.id),
            env,
        }
    }
}

/// Uniform worker runtime interface
#[async_trait]
pub trait WorkerDriver: Send + Sync {
    /// Start a worker. Idempotent: an already-running handle is returned as-is.
    async fn start(&self, spec: &WorkerSpec) -> Result<String, DriverError>;

    /// Stop a worker. Idempotent: a missing handle succeeds.
    async fn stop(&self, handle: &str) -> Result<(), DriverError>;

    /// Inspect a worker's runtime state
    async fn inspect(&self, handle: &str) -> Result<WorkerStatus, DriverError>;

    /// Tail the worker's log output
    async fn tail(&self, handle: &str, lines: usize) -> Result<Vec<String>, DriverError>;
}

/// Bound a driver operation by a deadline; a timeout is a retryable error.
pub(crate) async fn with_deadline<T, F>(deadline: Duration, what: &str, fut: F) -> Result<T, DriverError>
where
    F: Future<Output = Result<T, DriverError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::retryable(format!(
            "{} deadline exceeded after {:?}",
            what, deadline
        ))),
    }
}

/// Construct the configured driver variant
pub async fn from_config(config: &AppConfig) -> crate::error::Result<Arc<dyn WorkerDriver>> {
    match config.runtime_driver.as_str() {
        "docker" => Ok(Arc::new(DockerDriver::new(
            config.worker_image.clone(),
            config.docker_network.clone(),
        ))),
        "kubernetes" => {
            let driver = KubeDriver::new(config.kube_namespace.clone(), config.worker_image.clone())
                .await
                .map_err(|e| crate::error::Error::Internal(e.message))?;
            Ok(Arc::new(driver))
        }
        other => Err(crate::error::Error::Internal(format!(
            "unknown runtime driver '{}', expected 'docker' or 'kubernetes'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_store::{materialize, CreateStreamRequest};

    fn sample_stream() -> Stream {
        let req: CreateStreamRequest = serde_json::from_value(serde_json::json!({
            "name": "gate-cam",
            "source_url": "rtsp://10.0.0.4/stream1",
            "latitude": 52.1,
            "longitude": 4.3
        }))
        .unwrap();
        materialize(req)
    }

    #[test]
    fn test_handle_is_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(WorkerSpec::handle_for(id), format!("worker-{}", id));
        assert_eq!(WorkerSpec::handle_for(id), WorkerSpec::handle_for(id));
    }

    #[test]
    fn test_spec_env_carries_worker_observable_config() {
        let stream = sample_stream();
        let settings = SystemSettings::default();
        let config = AppConfig::default();
        let spec = WorkerSpec::build(&stream, &settings, &config);

        let get = |key: &str| {
            spec.env
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        assert_eq!(get("STREAM_ID").unwrap(), stream.id.to_string());
        assert_eq!(get("SOURCE_URL").unwrap(), "rtsp://10.0.0.4/stream1");
        assert_eq!(get("GRID_SIZE").unwrap(), "16");
        assert_eq!(get("LIVE_PREVIEW_FPS").unwrap(), "6");
        assert_eq!(
            get("FRAME_CHANNEL").unwrap(),
            format!("frames/{}", stream.id)
        );
        assert_eq!(get("LATITUDE").unwrap(), "52.1");
        assert!(get("REDIS_URL").is_some());
    }

    #[test]
    fn test_driver_error_maps_to_api_taxonomy() {
        let retry: crate::error::Error = DriverError::retryable("busy").into();
        assert!(matches!(retry, crate::error::Error::RuntimeUnavailable(_)));
        let perm: crate::error::Error = DriverError::permanent("bad image").into();
        assert!(matches!(perm, crate::error::Error::Internal(_)));
    }
}
