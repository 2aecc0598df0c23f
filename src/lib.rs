//! VectorFlow Control Plane
//!
//! Fleet manager for per-stream optical-flow workers: persists declared
//! stream configuration, reconciles it against the container/pod runtime,
//! brokers live preview frames from pub/sub to WebSocket subscribers, and
//! ingests alerting webhooks.
//!
//! ## Components
//!
//! 1. StreamStore - declared config + runtime facts (Postgres)
//! 2. SettingsManager - singleton global settings with change notifications
//! 3. AlertIngest - webhook ingestion, alert-group state
//! 4. RuntimeDriver - docker / kubernetes worker lifecycle
//! 5. Reconciler - desired vs actual worker state, per-stream serialization
//! 6. FrameBroker - pub/sub ingest, FPS cap, fan-out
//! 7. SubscriberHub - bounded per-client queues, drop-oldest policy
//! 8. WebAPI - REST + WebSocket surface

pub mod alert_ingest;
pub mod error;
pub mod frame_broker;
pub mod metrics;
pub mod models;
pub mod reconciler;
pub mod runtime_driver;
pub mod schema;
pub mod settings_manager;
pub mod state;
pub mod stream_store;
pub mod subscriber_hub;
pub mod web_api;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
