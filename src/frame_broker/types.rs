//! Frame message types
//!
//! Workers publish UTF-8 JSON per stream channel; the broker re-encodes into
//! the wire shape WebSocket clients expect. Field aliases absorb the worker's
//! long-form names.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

fn frame_kind() -> String {
    "frame".to_string()
}

/// One preview frame with derived flow metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMessage {
    #[serde(rename = "type", default = "frame_kind")]
    pub kind: String,
    pub stream_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_name: Option<String>,
    /// Wall-clock milliseconds
    #[serde(alias = "timestamp")]
    pub ts: i64,
    #[serde(alias = "width")]
    pub w: u32,
    #[serde(alias = "height")]
    pub h: u32,
    #[serde(default)]
    pub fps: f64,
    #[serde(default)]
    pub vector_count: u32,
    #[serde(default)]
    pub avg_magnitude: f64,
    #[serde(default)]
    pub max_magnitude: f64,
    #[serde(default)]
    pub direction_degrees: f64,
    #[serde(default)]
    pub direction_coherence: f64,
    pub frame_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectors: Option<Value>,
}

impl FrameMessage {
    pub fn is_frame(&self) -> bool {
        self.kind == "frame"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worker_payload_long_names() {
        let id = Uuid::new_v4();
        let raw = serde_json::json!({
            "type": "frame",
            "stream_id": id,
            "stream_name": "gate-cam",
            "timestamp": 1719830000123i64,
            "width": 960,
            "height": 540,
            "fps": 12.5,
            "avg_magnitude": 1.42,
            "max_magnitude": 6.8,
            "direction_degrees": 271.5,
            "direction_coherence": 0.83,
            "vector_count": 42,
            "frame_b64": "aGVsbG8=",
            "vectors": [{"x": 1.0, "y": 2.0, "u": 0.5, "v": 0.1, "mag": 0.51}]
        });
        let msg: FrameMessage = serde_json::from_value(raw).unwrap();
        assert!(msg.is_frame());
        assert_eq!(msg.stream_id, id);
        assert_eq!(msg.w, 960);
        assert_eq!(msg.h, 540);
        assert_eq!(msg.ts, 1719830000123);
        assert_eq!(msg.vector_count, 42);
        assert!(msg.vectors.is_some());
    }

    #[test]
    fn test_serialized_shape_uses_short_names() {
        let id = Uuid::new_v4();
        let msg = FrameMessage {
            kind: "frame".to_string(),
            stream_id: id,
            stream_name: None,
            ts: 1,
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
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "frame");
        assert_eq!(value["w"], 640);
        assert_eq!(value["h"], 360);
        assert!(value.get("width").is_none());
        assert!(value.get("vectors").is_none());
        assert!(value.get("stream_name").is_none());
    }

    #[test]
    fn test_status_payload_is_not_a_frame() {
        let raw = serde_json::json!({
            "type": "stream_status",
            "stream_id": Uuid::new_v4(),
            "timestamp": 5i64,
            "width": 0,
            "height": 0,
            "frame_b64": ""
        });
        let msg: FrameMessage = serde_json::from_value(raw).unwrap();
        assert!(!msg.is_frame());
    }
}
