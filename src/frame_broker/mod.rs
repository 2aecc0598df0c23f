//! FrameBroker - pub/sub ingest, throttling, and fan-out
//!
//! ## Responsibilities
//!
//! - Subscribe to the per-stream frame channel pattern
//! - Record frame arrival times (drives the connected status)
//! - Apply the global per-stream FPS cap
//! - Dispatch surviving frames into the subscription hub
//! - Reconnect with exponential backoff; subscribers stay connected meanwhile
//!
//! Frames are best-effort and ephemeral: nothing is buffered beyond the
//! per-subscriber queues in the hub.

mod throttle;
mod types;

pub use throttle::FpsGate;
pub use types::FrameMessage;

use crate::settings_manager::SystemSettings;
use crate::subscriber_hub::SubscriberHub;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;

/// Per-stream frame arrival tracking, shared with the reconciler
#[derive(Default)]
pub struct FrameActivity {
    last_seen: RwLock<HashMap<Uuid, Instant>>,
}

impl FrameActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stream_id: Uuid) {
        self.last_seen
            .write()
            .unwrap()
            .insert(stream_id, Instant::now());
    }

    pub fn forget(&self, stream_id: Uuid) {
        self.last_seen.write().unwrap().remove(&stream_id);
    }

    /// Whether a frame arrived within the given window
    pub fn is_fresh(&self, stream_id: Uuid, within: Duration) -> bool {
        self.last_seen
            .read()
            .unwrap()
            .get(&stream_id)
            .map(|t| t.elapsed() < within)
            .unwrap_or(false)
    }
}

/// Next reconnect delay: double, capped
fn next_backoff(current: Duration, cap: Duration) -> Duration {
    (current * 2).min(cap)
}

/// FrameBroker instance
pub struct FrameBroker {
    redis_url: String,
    pattern: String,
    hub: Arc<SubscriberHub>,
    activity: Arc<FrameActivity>,
    settings_rx: watch::Receiver<SystemSettings>,
    backoff_initial: Duration,
    backoff_cap: Duration,
}

impl FrameBroker {
    pub fn new(
        redis_url: String,
        pattern: String,
        hub: Arc<SubscriberHub>,
        activity: Arc<FrameActivity>,
        settings_rx: watch::Receiver<SystemSettings>,
        backoff_initial: Duration,
        backoff_cap: Duration,
    ) -> Self {
        Self {
            redis_url,
            pattern,
            hub,
            activity,
            settings_rx,
            backoff_initial,
            backoff_cap,
        }
    }

    /// Subscription loop with reconnect. Runs until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut gate = FpsGate::new(self.settings_rx.borrow().live_preview_fps);
        let mut settings_rx = self.settings_rx.clone();
        let mut backoff = self.backoff_initial;

        tracing::info!(pattern = %self.pattern, "Frame broker starting");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self
                .subscribe_session(&mut gate, &mut settings_rx, &mut shutdown, &mut backoff)
                .await
            {
                Ok(()) => {
                    // Clean shutdown requested
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Frame subscription lost, reconnecting"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                    backoff = next_backoff(backoff, self.backoff_cap);
                }
            }
        }

        tracing::info!("Frame broker stopped");
    }

    /// One connected pub/sub session; returns Ok on shutdown, Err on failure.
    async fn subscribe_session(
        &self,
        gate: &mut FpsGate,
        settings_rx: &mut watch::Receiver<SystemSettings>,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Duration,
    ) -> Result<(), redis::RedisError> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(&self.pattern).await?;
        tracing::info!(pattern = %self.pattern, "Subscribed to frame channels");
        *backoff = self.backoff_initial;

        let mut messages = pubsub.on_message();

        loop {
            tokio::select! {
                msg = messages.next() => {
                    let Some(msg) = msg else {
                        return Err(redis::RedisError::from((
                            redis::ErrorKind::IoError,
                            "pub/sub stream closed",
                        )));
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::debug!(error = %e, "Undecodable frame payload");
                            continue;
                        }
                    };
                    self.handle_payload(&payload, gate);
                }
                _ = settings_rx.changed() => {
                    let fps = settings_rx.borrow().live_preview_fps;
                    gate.set_fps(fps);
                    tracing::info!(fps_cap = fps, "Frame throttle updated");
                }
                _ = shutdown.changed() => {
                    return Ok(());
                }
            }
        }
    }

    /// Parse, track, throttle, dispatch.
    fn handle_payload(&self, payload: &str, gate: &mut FpsGate) {
        let message: FrameMessage = match serde_json::from_str(payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring non-frame payload");
                return;
            }
        };

        if !message.is_frame() {
            // Workers also publish stream_status payloads on their channel
            return;
        }

        let stream_id = message.stream_id;
        self.activity.record(stream_id);

        if !gate.admit(stream_id, Instant::now()) {
            metrics::counter!("vectorflow_frames_throttled_total").increment(1);
            return;
        }

        metrics::counter!("vectorflow_frames_forwarded_total").increment(1);
        self.hub.dispatch(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let cap = Duration::from_secs(10);
        let mut delay = Duration::from_millis(500);
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(delay);
            delay = next_backoff(delay, cap);
        }
        assert_eq!(
            seen,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(8000),
                Duration::from_secs(10),
            ]
        );
        assert_eq!(next_backoff(cap, cap), cap);
    }

    #[test]
    fn test_activity_freshness() {
        let activity = FrameActivity::new();
        let id = Uuid::new_v4();
        assert!(!activity.is_fresh(id, Duration::from_secs(15)));
        activity.record(id);
        assert!(activity.is_fresh(id, Duration::from_secs(15)));
        assert!(!activity.is_fresh(id, Duration::from_nanos(1)));
        activity.forget(id);
        assert!(!activity.is_fresh(id, Duration::from_secs(15)));
    }
}
