//! AlertIngest - webhook ingestion and alert-group state
//!
//! ## Responsibilities
//!
//! - Parse inbound alerting webhooks (Alertmanager envelope shape)
//! - Persist one append-only event per contained alert, raw payload included
//! - Derive the queryable group view (fingerprint or composite identifier)
//! - Manual resolution overrides, invalidated by newer firing events

mod repository;
mod service;
mod types;

pub use repository::AlertRepository;
pub use service::AlertService;
pub use types::*;
