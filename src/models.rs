//! Shared API response models

use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Worker log tail response
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerLogsResponse {
    pub worker_status: String,
    pub worker_container_name: Option<String>,
    pub logs: Vec<String>,
    pub error: Option<String>,
}
