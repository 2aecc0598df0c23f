//! Per-stream FPS gate
//!
//! Drops any frame arriving less than `1 / fps_cap` after the last forwarded
//! frame of the same stream.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub struct FpsGate {
    interval: Duration,
    last_forwarded: HashMap<Uuid, Instant>,
}

impl FpsGate {
    pub fn new(fps_cap: f64) -> Self {
        Self {
            interval: Self::interval_for(fps_cap),
            last_forwarded: HashMap::new(),
        }
    }

    fn interval_for(fps_cap: f64) -> Duration {
        let fps = fps_cap.max(0.5);
        Duration::from_secs_f64(1.0 / fps)
    }

    /// Update the cap without resetting per-stream state
    pub fn set_fps(&mut self, fps_cap: f64) {
        self.interval = Self::interval_for(fps_cap);
    }

    /// Whether a frame for `stream_id` arriving at `now` may be forwarded
    pub fn admit(&mut self, stream_id: Uuid, now: Instant) -> bool {
        match self.last_forwarded.get(&stream_id) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                self.last_forwarded.insert(stream_id, now);
                true
            }
        }
    }

    /// Drop state for streams that no longer publish
    pub fn forget(&mut self, stream_id: Uuid) {
        self.last_forwarded.remove(&stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn test_first_frame_always_admitted() {
        let mut gate = FpsGate::new(2.0);
        assert!(gate.admit(Uuid::new_v4(), Instant::now()));
    }

    #[test]
    fn test_frames_below_interval_dropped() {
        let mut gate = FpsGate::new(2.0); // 500ms interval
        let id = Uuid::new_v4();
        let base = Instant::now();
        assert!(gate.admit(id, at(base, 0)));
        assert!(!gate.admit(id, at(base, 100)));
        assert!(!gate.admit(id, at(base, 499)));
        assert!(gate.admit(id, at(base, 500)));
    }

    #[test]
    fn test_one_second_window_bound() {
        // 20 fps input against a 2 fps cap: at most ceil(2) + 1 forwards per second
        let mut gate = FpsGate::new(2.0);
        let id = Uuid::new_v4();
        let base = Instant::now();
        let mut forwarded = 0;
        for i in 0..20 {
            if gate.admit(id, at(base, i * 50)) {
                forwarded += 1;
            }
        }
        assert!(forwarded <= 3, "forwarded {} frames in 1s at 2 fps cap", forwarded);
        assert!(forwarded >= 2);
    }

    #[test]
    fn test_streams_are_throttled_independently() {
        let mut gate = FpsGate::new(1.0);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let base = Instant::now();
        assert!(gate.admit(a, at(base, 0)));
        assert!(gate.admit(b, at(base, 10)));
        assert!(!gate.admit(a, at(base, 20)));
        assert!(!gate.admit(b, at(base, 30)));
    }

    #[test]
    fn test_cap_change_applies_immediately() {
        let mut gate = FpsGate::new(1.0);
        let id = Uuid::new_v4();
        let base = Instant::now();
        assert!(gate.admit(id, at(base, 0)));
        assert!(!gate.admit(id, at(base, 200)));
        gate.set_fps(10.0);
        assert!(gate.admit(id, at(base, 210)));
    }

    #[test]
    fn test_sub_half_fps_clamped() {
        // Values below the 0.5 fps settings floor are treated as 0.5
        let mut gate = FpsGate::new(0.0);
        let id = Uuid::new_v4();
        let base = Instant::now();
        assert!(gate.admit(id, at(base, 0)));
        assert!(gate.admit(id, at(base, 2000)));
    }
}
