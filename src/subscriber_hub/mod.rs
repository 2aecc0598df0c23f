//! SubscriberHub - WebSocket subscriber registry and fan-out
//!
//! ## Responsibilities
//!
//! - Subscriber registration with an optional stream filter
//! - Non-blocking dispatch with a bounded per-subscriber queue
//! - Drop-oldest on overflow, per-subscriber drop accounting
//! - Policy close for subscribers that only ever drop
//!
//! Dispatch never awaits a subscriber: a stalled client affects only its own
//! queue. Frame order per subscriber follows broker arrival order, minus
//! whatever the drop-oldest policy discarded.

use crate::frame_broker::FrameMessage;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;
use uuid::Uuid;

/// Bounded queue depth per subscriber
const QUEUE_DEPTH: usize = 4;
/// Consecutive dropped dispatches before a subscriber is closed
const MAX_CONSECUTIVE_DROPS: u32 = 64;

/// Why a subscriber's sequence ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit unsubscribe (client went away)
    Unsubscribed,
    /// Drop-only for too long; closed with the policy code
    Policy,
    /// Process shutdown
    Shutdown,
}

struct QueueState {
    queue: VecDeque<FrameMessage>,
    dropped: u64,
    consecutive_drops: u32,
    closed: Option<CloseReason>,
}

struct SubscriberShared {
    id: Uuid,
    filter: Option<Uuid>,
    notify: Notify,
    state: Mutex<QueueState>,
}

/// Handle returned to the WebSocket bridge
pub struct SubscriberHandle {
    shared: Arc<SubscriberShared>,
}

impl SubscriberHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Next frame, or None once the subscriber is closed
    pub async fn next(&self) -> Option<FrameMessage> {
        loop {
            {
                let mut state = self.shared.state.lock().unwrap();
                if let Some(message) = state.queue.pop_front() {
                    return Some(message);
                }
                if state.closed.is_some() {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Why the sequence ended (None while still open)
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.state.lock().unwrap().closed
    }

    /// Total frames dropped for this subscriber
    pub fn drop_count(&self) -> u64 {
        self.shared.state.lock().unwrap().dropped
    }
}

/// SubscriberHub instance
pub struct SubscriberHub {
    subscribers: RwLock<HashMap<Uuid, Arc<SubscriberShared>>>,
    connection_count: AtomicU64,
}

impl SubscriberHub {
    /// Create new SubscriberHub
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a subscriber; None filter means all streams
    pub fn subscribe(&self, filter: Option<Uuid>) -> SubscriberHandle {
        let id = Uuid::new_v4();
        let shared = Arc::new(SubscriberShared {
            id,
            filter,
            notify: Notify::new(),
            state: Mutex::new(QueueState {
                queue: VecDeque::with_capacity(QUEUE_DEPTH),
                dropped: 0,
                consecutive_drops: 0,
                closed: None,
            }),
        });

        self.subscribers.write().unwrap().insert(id, shared.clone());
        let count = self.connection_count.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("vectorflow_ws_subscribers").set(count as f64);

        tracing::info!(subscriber_id = %id, filter = ?filter, "Subscriber connected");
        SubscriberHandle { shared }
    }

    /// Remove a subscriber and end its sequence
    pub fn unsubscribe(&self, id: Uuid) {
        let removed = self.subscribers.write().unwrap().remove(&id);
        if let Some(shared) = removed {
            Self::close(&shared, CloseReason::Unsubscribed);
            let count = self.connection_count.fetch_sub(1, Ordering::Relaxed) - 1;
            metrics::gauge!("vectorflow_ws_subscribers").set(count as f64);
            tracing::info!(subscriber_id = %id, "Subscriber disconnected");
        }
    }

    /// Deliver a frame to every matching subscriber without blocking.
    pub fn dispatch(&self, message: FrameMessage) {
        let mut policy_closed = Vec::new();

        {
            let subscribers = self.subscribers.read().unwrap();
            for shared in subscribers.values() {
                if let Some(filter) = shared.filter {
                    if filter != message.stream_id {
                        continue;
                    }
                }

                let mut state = shared.state.lock().unwrap();
                if state.closed.is_some() {
                    continue;
                }

                if state.queue.len() >= QUEUE_DEPTH {
                    state.queue.pop_front();
                    state.dropped += 1;
                    state.consecutive_drops += 1;
                    metrics::counter!("vectorflow_frames_dropped_total").increment(1);

                    if state.consecutive_drops > MAX_CONSECUTIVE_DROPS {
                        state.closed = Some(CloseReason::Policy);
                        state.queue.clear();
                        policy_closed.push(shared.id);
                        shared.notify.notify_one();
                        tracing::warn!(
                            subscriber_id = %shared.id,
                            dropped = state.dropped,
                            "Subscriber closed: drop-only beyond policy limit"
                        );
                        continue;
                    }
                } else {
                    state.consecutive_drops = 0;
                }

                state.queue.push_back(message.clone());
                drop(state);
                shared.notify.notify_one();
            }
        }

        if !policy_closed.is_empty() {
            let mut subscribers = self.subscribers.write().unwrap();
            for id in policy_closed {
                if subscribers.remove(&id).is_some() {
                    let count = self.connection_count.fetch_sub(1, Ordering::Relaxed) - 1;
                    metrics::gauge!("vectorflow_ws_subscribers").set(count as f64);
                }
            }
        }
    }

    /// End every subscriber's sequence (process shutdown)
    pub fn close_all(&self) {
        let mut subscribers = self.subscribers.write().unwrap();
        for shared in subscribers.values() {
            Self::close(shared, CloseReason::Shutdown);
        }
        subscribers.clear();
        self.connection_count.store(0, Ordering::Relaxed);
        metrics::gauge!("vectorflow_ws_subscribers").set(0.0);
    }

    /// Current subscriber count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }

    fn close(shared: &SubscriberShared, reason: CloseReason) {
        let mut state = shared.state.lock().unwrap();
        if state.closed.is_none() {
            state.closed = Some(reason);
        }
        shared.notify.notify_one();
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream_id: Uuid, ts: i64) -> FrameMessage {
        FrameMessage {
            kind: "frame".to_string(),
            stream_id,
            stream_name: None,
            ts,
            w: 640,
            h: 360,
            fps: 6.0,
            vector_count: 0,
            avg_magnitude: 0.0,
            max_magnitude: 0.0,
            direction_degrees: 0.0,
            direction_coherence: 0.0,
            frame_b64: "e30=".to_string(),
            vectors: None,
        }
    }

    #[tokio::test]
    async fn test_filter_matching() {
        let hub = SubscriberHub::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let only_a = hub.subscribe(Some(a));
        let all = hub.subscribe(None);

        hub.dispatch(frame(a, 1));
        hub.dispatch(frame(b, 2));

        assert_eq!(only_a.next().await.unwrap().ts, 1);
        assert_eq!(all.next().await.unwrap().ts, 1);
        assert_eq!(all.next().await.unwrap().ts, 2);
        assert_eq!(only_a.drop_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_oldest_on_full_queue() {
        let hub = SubscriberHub::new();
        let stream = Uuid::new_v4();
        let sub = hub.subscribe(Some(stream));

        for ts in 1..=6 {
            hub.dispatch(frame(stream, ts));
        }

        // Queue depth 4: frames 1 and 2 were discarded for 5 and 6
        assert_eq!(sub.drop_count(), 2);
        for expected in 3..=6 {
            assert_eq!(sub.next().await.unwrap().ts, expected);
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_affect_fast_one() {
        let hub = SubscriberHub::new();
        let stream = Uuid::new_v4();
        let fast = hub.subscribe(Some(stream));
        let slow = hub.subscribe(Some(stream));

        for ts in 1..=60 {
            hub.dispatch(frame(stream, ts));
            // The fast subscriber keeps up; the slow one never reads
            assert_eq!(fast.next().await.unwrap().ts, ts);
        }

        assert_eq!(fast.drop_count(), 0);
        assert_eq!(slow.drop_count(), 56);
        assert!(slow.close_reason().is_none());
    }

    #[tokio::test]
    async fn test_policy_close_after_consecutive_drops() {
        let hub = SubscriberHub::new();
        let stream = Uuid::new_v4();
        let stalled = hub.subscribe(Some(stream));

        for ts in 1..=100 {
            hub.dispatch(frame(stream, ts));
        }

        assert_eq!(stalled.close_reason(), Some(CloseReason::Policy));
        assert!(stalled.next().await.is_none());
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_sequence() {
        let hub = SubscriberHub::new();
        let sub = hub.subscribe(None);
        let id = sub.id();
        hub.unsubscribe(id);
        assert!(sub.next().await.is_none());
        assert_eq!(sub.close_reason(), Some(CloseReason::Unsubscribed));
    }

    #[tokio::test]
    async fn test_close_all_on_shutdown() {
        let hub = SubscriberHub::new();
        let one = hub.subscribe(None);
        let two = hub.subscribe(Some(Uuid::new_v4()));
        hub.close_all();
        assert!(one.next().await.is_none());
        assert!(two.next().await.is_none());
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_queued_frames_drain_before_close() {
        let hub = SubscriberHub::new();
        let stream = Uuid::new_v4();
        let sub = hub.subscribe(Some(stream));
        hub.dispatch(frame(stream, 1));
        hub.dispatch(frame(stream, 2));
        hub.unsubscribe(sub.id());
        // Already-queued frames are still readable after unsubscribe
        assert_eq!(sub.next().await.unwrap().ts, 1);
        assert_eq!(sub.next().await.unwrap().ts, 2);
        assert!(sub.next().await.is_none());
    }
}
