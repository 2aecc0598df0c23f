//! StreamStore - declared stream configuration + runtime facts
//!
//! ## Responsibilities
//!
//! - Stream CRUD with range validation
//! - Runtime-fact persistence (handle, started_at, last_error, status)
//! - Lifecycle preconditions (no delete while a worker is attached)
//!
//! Activation side effects live in the reconciler; this store only records
//! desired and observed state.

mod repository;
mod service;
mod types;

pub use repository::StreamRepository;
pub use service::StreamService;
pub use types::*;

use sqlx::PgPool;

/// StreamStore instance
pub struct StreamStore {
    service: StreamService,
}

impl StreamStore {
    /// Create new StreamStore
    pub fn new(pool: PgPool) -> Self {
        let repo = StreamRepository::new(pool);
        Self {
            service: StreamService::new(repo),
        }
    }

    /// Get service reference
    pub fn service(&self) -> &StreamService {
        &self.service
    }
}
