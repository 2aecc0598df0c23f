//! Container variant of the worker driver
//!
//! Drives the docker CLI through `tokio::process::Command`. The container name
//! doubles as the handle; `docker rm -f` makes stop idempotent and `start` on a
//! running container is a no-op.

use super::{
    with_deadline, DriverError, WorkerDriver, WorkerSpec, WorkerState, WorkerStatus,
    INSPECT_DEADLINE, START_DEADLINE, STOP_DEADLINE,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;

/// Docker CLI driver
pub struct DockerDriver {
    image: String,
    network: String,
}

impl DockerDriver {
    pub fn new(image: String, network: String) -> Self {
        Self { image, network }
    }

    async fn run_docker(args: &[String]) -> Result<String, DriverError> {
        let output = Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| DriverError::retryable(format!("docker CLI unavailable: {}", e)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(classify_docker_error(&stderr))
        }
    }

    /// Current container state, or Missing
    async fn raw_state(handle: &str) -> Result<(WorkerState, Option<DateTime<Utc>>, Option<String>), DriverError> {
        let args = vec![
            "inspect".to_string(),
            "-f".to_string(),
            "{{.State.Status}}|{{.State.StartedAt}}|{{.State.Error}}".to_string(),
            handle.to_string(),
        ];
        match Self::run_docker(&args).await {
            Ok(line) => Ok(parse_inspect_line(&line)),
            Err(e) if is_not_found(&e.message) => Ok((WorkerState::Missing, None, None)),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl WorkerDriver for DockerDriver {
    async fn start(&self, spec: &WorkerSpec) -> Result<String, DriverError> {
        let handle = spec.handle.clone();
        let image = self.image.clone();
        let network = self.network.clone();
        let env = spec.env.clone();
        let stream_id = spec.stream_id;

        with_deadline(START_DEADLINE, "docker start", async move {
            match Self::raw_state(&handle).await? {
                (WorkerState::Running, _, _) | (WorkerState::Starting, _, _) => {
                    tracing::debug!(handle = %handle, "Worker container already running");
                    return Ok(handle);
                }
                (WorkerState::Exited, _, _) => {
                    // Stale container with the same name: replace it
                    let _ = Self::run_docker(&["rm".to_string(), "-f".to_string(), handle.clone()])
                        .await;
                }
                (WorkerState::Missing, _, _) => {}
            }

            let mut args: Vec<String> = vec![
                "run".into(),
                "-d".into(),
                "--name".into(),
                handle.clone(),
                "--network".into(),
                network,
                "--restart".into(),
                "unless-stopped".into(),
                "--label".into(),
                "app=vectorflow-worker".into(),
                "--label".into(),
                format!("stream_id={}", stream_id),
            ];
            for (key, value) in &env {
                args.push("-e".into());
                args.push(format!("{}={}", key, value));
            }
            args.push(image);

            Self::run_docker(&args).await?;
            tracing::info!(handle = %handle, "Worker container started");
            Ok(handle)
        })
        .await
    }

    async fn stop(&self, handle: &str) -> Result<(), DriverError> {
        let handle = handle.to_string();
        with_deadline(STOP_DEADLINE, "docker stop", async move {
            match Self::run_docker(&["rm".to_string(), "-f".to_string(), handle.clone()]).await {
                Ok(_) => {
                    tracing::info!(handle = %handle, "Worker container removed");
                    Ok(())
                }
                Err(e) if is_not_found(&e.message) => {
                    tracing::debug!(handle = %handle, "Worker container already absent");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn inspect(&self, handle: &str) -> Result<WorkerStatus, DriverError> {
        let handle = handle.to_string();
        with_deadline(INSPECT_DEADLINE, "docker inspect", async move {
            let (state, started_at, last_error) = Self::raw_state(&handle).await?;
            Ok(WorkerStatus {
                state,
                started_at,
                last_error,
            })
        })
        .await
    }

    async fn tail(&self, handle: &str, lines: usize) -> Result<Vec<String>, DriverError> {
        let handle = handle.to_string();
        with_deadline(INSPECT_DEADLINE, "docker logs", async move {
            let tail_arg = lines.to_string();
            let output = Command::new("docker")
                .args(["logs", "--tail", tail_arg.as_str(), handle.as_str()])
                .output()
                .await
                .map_err(|e| DriverError::retryable(format!("docker CLI unavailable: {}", e)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if is_not_found(&stderr) {
                    return Ok(Vec::new());
                }
                return Err(classify_docker_error(&stderr));
            }

            // Workers log to both std streams; docker splits them in the reply
            let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok(combined.lines().map(|l| l.to_string()).collect())
        })
        .await
    }
}

fn is_not_found(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("no such container") || lower.contains("no such object")
}

/// Parse `status|startedAt|error` from the inspect format string
fn parse_inspect_line(line: &str) -> (WorkerState, Option<DateTime<Utc>>, Option<String>) {
    let mut parts = line.splitn(3, '|');
    let status = parts.next().unwrap_or_default();
    let started_raw = parts.next().unwrap_or_default();
    let error_raw = parts.next().unwrap_or_default();

    let state = match status {
        "running" => WorkerState::Running,
        "created" | "restarting" => WorkerState::Starting,
        "exited" | "dead" | "paused" | "removing" => WorkerState::Exited,
        _ => WorkerState::Missing,
    };

    let started_at = DateTime::parse_from_rfc3339(started_raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .filter(|dt| dt.timestamp() > 0);

    let last_error = if error_raw.is_empty() {
        None
    } else {
        Some(error_raw.to_string())
    };

    (state, started_at, last_error)
}

/// Image and config problems are permanent; everything else is worth a retry
fn classify_docker_error(stderr: &str) -> DriverError {
    let lower = stderr.to_lowercase();
    let permanent = lower.contains("no such image")
        || lower.contains("pull access denied")
        || lower.contains("manifest unknown")
        || lower.contains("invalid")
        || lower.contains("unable to find image");
    if permanent {
        DriverError::permanent(stderr.to_string())
    } else {
        DriverError::retryable(stderr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inspect_running() {
        let (state, started_at, error) =
            parse_inspect_line("running|2025-07-01T10:00:00.123456789Z|");
        assert_eq!(state, WorkerState::Running);
        assert!(started_at.is_some());
        assert!(error.is_none());
    }

    #[test]
    fn test_parse_inspect_exited_with_error() {
        let (state, _, error) = parse_inspect_line("exited|0001-01-01T00:00:00Z|oom killed");
        assert_eq!(state, WorkerState::Exited);
        assert_eq!(error.as_deref(), Some("oom killed"));
    }

    #[test]
    fn test_parse_inspect_zero_time_filtered() {
        let (_, started_at, _) = parse_inspect_line("created|0001-01-01T00:00:00Z|");
        assert!(started_at.is_none());
    }

    #[test]
    fn test_classify_image_errors_permanent() {
        assert!(!classify_docker_error("Unable to find image 'x:latest' locally").retryable);
        assert!(!classify_docker_error("pull access denied for x").retryable);
        assert!(classify_docker_error("Cannot connect to the Docker daemon").retryable);
    }

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found("Error: No such container: worker-123"));
        assert!(!is_not_found("connection refused"));
    }
}
