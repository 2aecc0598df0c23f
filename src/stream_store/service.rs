//! Stream store service
//!
//! Validation and lifecycle preconditions above the repository

use super::repository::StreamRepository;
use super::types::*;
use crate::error::{Error, Result};
use uuid::Uuid;

/// Stream service for business logic
pub struct StreamService {
    repo: StreamRepository,
}

impl StreamService {
    /// Create new service
    pub fn new(repo: StreamRepository) -> Self {
        Self { repo }
    }

    /// List all streams
    pub async fn list(&self) -> Result<Vec<Stream>> {
        self.repo.get_all().await
    }

    /// Get stream by id
    pub async fn get(&self, id: Uuid) -> Result<Stream> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Stream {} not found", id)))
    }

    /// Create a stream. `is_active=true` only records the desired state; the
    /// caller invokes the reconciler after commit.
    pub async fn create(&self, req: CreateStreamRequest) -> Result<Stream> {
        let stream = materialize(req);
        validate_declared(&stream)?;
        self.repo.insert(&stream).await
    }

    /// Update a stream's declared fields. Returns the pre-update snapshot and
    /// the updated row so the caller can diff for a restart decision.
    pub async fn update(&self, id: Uuid, req: &UpdateStreamRequest) -> Result<(Stream, Stream)> {
        let before = self.get(id).await?;
        let next = apply_update(&before, req);
        validate_declared(&next)?;
        let after = self.repo.update_declared(&next).await?;
        Ok((before, after))
    }

    /// Delete a stream. Refused while a worker is still attached.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let stream = self.get(id).await?;
        if stream.worker_handle.is_some() || stream.is_active {
            return Err(Error::Conflict(format!(
                "Stream {} still has a worker attached; deactivate it first",
                id
            )));
        }
        self.repo.delete(id).await
    }

    /// Flip the desired-state flag
    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<Stream> {
        self.get(id).await?;
        self.repo.set_active(id, active).await?;
        self.get(id).await
    }

    /// Runtime-fact write-through (reconciler only)
    pub async fn set_runtime_facts(&self, id: Uuid, facts: &RuntimeFacts) -> Result<()> {
        self.repo.set_runtime_facts(id, facts).await
    }

    /// Status-only update (reconciler only)
    pub async fn set_status(
        &self,
        id: Uuid,
        status: ConnectionStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        self.repo.set_status(id, status, last_error).await
    }

    /// Stream counts for process metrics
    pub async fn counts(&self) -> Result<(i64, i64)> {
        self.repo.counts().await
    }
}
