//! SettingsManager - singleton global settings with change notifications
//!
//! ## Responsibilities
//!
//! - Persist the singleton settings row
//! - Publish a coherent snapshot through a watch channel so the frame broker
//!   picks up FPS-cap changes without polling the database
//!
//! The worker-restart cascade on update is driven by the API layer through the
//! reconciler; `orientation_offset_deg` is pure UI data and changes no server
//! behavior.

mod repository;
mod types;

pub use repository::SettingsRepository;
pub use types::*;

use crate::error::Result;
use tokio::sync::watch;

/// SettingsManager instance
pub struct SettingsManager {
    repo: SettingsRepository,
    tx: watch::Sender<SystemSettings>,
}

impl SettingsManager {
    /// Load the current row and set up the notification channel
    pub async fn new(repo: SettingsRepository) -> Result<Self> {
        let current = repo.get().await?;
        let (tx, _) = watch::channel(current);
        Ok(Self { repo, tx })
    }

    /// Current settings snapshot
    pub fn current(&self) -> SystemSettings {
        self.tx.borrow().clone()
    }

    /// Subscribe to settings changes
    pub fn subscribe(&self) -> watch::Receiver<SystemSettings> {
        self.tx.subscribe()
    }

    /// Validate, persist, and broadcast an update
    pub async fn update(&self, req: &UpdateSettingsRequest) -> Result<SystemSettings> {
        let current = self.current();
        let next = apply_settings_update(&current, req)?;
        let saved = self.repo.update(&next).await?;

        tracing::info!(
            live_preview_fps = saved.live_preview_fps,
            live_preview_jpeg_quality = saved.live_preview_jpeg_quality,
            live_preview_max_width = saved.live_preview_max_width,
            "System settings updated"
        );

        let _ = self.tx.send(saved.clone());
        Ok(saved)
    }
}
