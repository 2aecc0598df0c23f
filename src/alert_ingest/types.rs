//! Alert ingest data types
//!
//! Inbound notification envelopes are arbitrary JSON; known fields are
//! extracted opportunistically and the raw payload is preserved verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Alertmanager-shaped notification envelope (best-effort view of the raw JSON)
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "groupKey")]
    pub group_key: Option<String>,
    #[serde(default)]
    pub alerts: Vec<WebhookAlert>,
}

/// One alert inside an envelope
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookAlert {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Option<Value>,
    #[serde(default, alias = "startsAt")]
    pub starts_at: Option<String>,
    #[serde(default, alias = "endsAt")]
    pub ends_at: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// Persisted alert event (append-only)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertEvent {
    pub id: i64,
    pub receiver: Option<String>,
    pub group_key: Option<String>,
    pub notification_status: Option<String>,
    pub alert_status: Option<String>,
    pub alert_name: Option<String>,
    pub alert_uid: Option<String>,
    pub severity: Option<String>,
    pub stream_name: Option<String>,
    pub fingerprint: Option<String>,
    pub group_identifier: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub labels: Value,
    pub annotations: Value,
    pub values: Value,
    pub raw_payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Event fields extracted from one alert, ready to insert
#[derive(Debug, Clone)]
pub struct NewAlertEvent {
    pub receiver: Option<String>,
    pub group_key: Option<String>,
    pub notification_status: Option<String>,
    pub alert_status: Option<String>,
    pub alert_name: Option<String>,
    pub alert_uid: Option<String>,
    pub severity: Option<String>,
    pub stream_name: Option<String>,
    pub fingerprint: Option<String>,
    pub group_identifier: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub labels: Value,
    pub annotations: Value,
    pub values: Value,
    pub raw_payload: Value,
}

/// Manual resolution record for an alert group
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertGroupState {
    pub identifier: String,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Group-state upsert request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertGroupStateRequest {
    pub identifier: String,
    pub resolved: bool,
}

/// Derived view over all events sharing an identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertGroupView {
    pub identifier: String,
    pub alert_name: Option<String>,
    pub stream_name: Option<String>,
    pub latest_status: Option<String>,
    pub latest_severity: Option<String>,
    /// Latest status with the manual resolution override applied
    pub status: String,
    pub event_count: i64,
    pub last_received_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Per-group aggregate computed by the repository
#[derive(Debug, Clone, FromRow)]
pub struct GroupAggregate {
    pub group_identifier: String,
    pub event_count: i64,
    pub last_received_at: DateTime<Utc>,
    /// Newest received_at among events whose status still demands attention
    pub last_firing_at: Option<DateTime<Utc>>,
}

/// Normalize a severity label into critical / warning / info
pub fn normalize_severity(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "critical" | "fatal" | "high" | "emergency" => "critical".to_string(),
        "warning" | "warn" | "medium" => "warning".to_string(),
        "info" | "informational" | "low" => "info".to_string(),
        other => other.to_string(),
    }
}

/// Derive the group identifier: fingerprint when available, else a composite
pub fn derive_identifier(
    fingerprint: Option<&str>,
    alert_name: Option<&str>,
    stream_name: Option<&str>,
    severity: Option<&str>,
) -> String {
    match fingerprint {
        Some(fp) if !fp.is_empty() => fp.to_string(),
        _ => format!(
            "{}|{}|{}",
            alert_name.unwrap_or("unknown"),
            stream_name.unwrap_or("unknown"),
            severity.unwrap_or("unknown")
        ),
    }
}

/// Effective group status: manual resolution holds only while no newer
/// firing-class event (firing / alerting / pending) has arrived since
/// `resolved_at`. `last_firing_at` comes from the group aggregate query.
pub fn effective_status(
    latest_status: Option<&str>,
    manual: Option<&AlertGroupState>,
    last_firing_at: Option<DateTime<Utc>>,
) -> String {
    if let Some(state) = manual {
        if state.resolved {
            let invalidated = match (state.resolved_at, last_firing_at) {
                (Some(resolved_at), Some(firing_at)) => firing_at > resolved_at,
                (None, Some(_)) => true,
                _ => false,
            };
            if !invalidated {
                return "resolved".to_string();
            }
        }
    }
    latest_status
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| "unknown".to_string())
}

impl WebhookAlert {
    /// Parse an RFC 3339 timestamp field, tolerating absence and garbage
    pub fn parse_ts(raw: Option<&str>) -> Option<DateTime<Utc>> {
        raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_severity() {
        assert_eq!(normalize_severity("CRITICAL"), "critical");
        assert_eq!(normalize_severity("fatal"), "critical");
        assert_eq!(normalize_severity("high"), "critical");
        assert_eq!(normalize_severity("warn"), "warning");
        assert_eq!(normalize_severity("medium"), "warning");
        assert_eq!(normalize_severity("informational"), "info");
        assert_eq!(normalize_severity("low"), "info");
        assert_eq!(normalize_severity("P3"), "p3");
    }

    #[test]
    fn test_identifier_prefers_fingerprint() {
        assert_eq!(
            derive_identifier(Some("abc123"), Some("HighFlow"), Some("gate"), Some("warning")),
            "abc123"
        );
        assert_eq!(
            derive_identifier(Some(""), Some("HighFlow"), Some("gate"), Some("warning")),
            "HighFlow|gate|warning"
        );
        assert_eq!(
            derive_identifier(None, None, None, None),
            "unknown|unknown|unknown"
        );
    }

    #[test]
    fn test_envelope_parse_alertmanager_shape() {
        let raw = serde_json::json!({
            "receiver": "vectorflow",
            "status": "firing",
            "groupKey": "{}:{alertname=\"HighFlowMagnitude\"}",
            "alerts": [{
                "status": "firing",
                "labels": {
                    "alertname": "HighFlowMagnitude",
                    "severity": "warning",
                    "stream_name": "gate-cam"
                },
                "annotations": {
                    "summary": "Flow magnitude above threshold"
                },
                "startsAt": "2025-07-01T12:00:00Z",
                "endsAt": "0001-01-01T00:00:00Z",
                "fingerprint": "f1a2b3"
            }]
        });
        let env: WebhookEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(env.receiver.as_deref(), Some("vectorflow"));
        assert_eq!(env.alerts.len(), 1);
        let alert = &env.alerts[0];
        assert_eq!(alert.labels.get("alertname").unwrap(), "HighFlowMagnitude");
        assert!(WebhookAlert::parse_ts(alert.starts_at.as_deref()).is_some());
        assert_eq!(alert.fingerprint.as_deref(), Some("f1a2b3"));
    }

    #[test]
    fn test_effective_status_manual_resolution() {
        let resolved_at = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
        let state = AlertGroupState {
            identifier: "f1".to_string(),
            resolved: true,
            resolved_at: Some(resolved_at),
            updated_at: resolved_at,
        };

        // No firing event since the manual resolve: stays resolved
        let earlier = resolved_at - chrono::Duration::minutes(5);
        assert_eq!(
            effective_status(Some("firing"), Some(&state), Some(earlier)),
            "resolved"
        );

        // Newer firing event invalidates the override
        let later = resolved_at + chrono::Duration::minutes(5);
        assert_eq!(
            effective_status(Some("firing"), Some(&state), Some(later)),
            "firing"
        );
    }

    #[test]
    fn test_effective_status_without_manual_state() {
        assert_eq!(effective_status(Some("Firing"), None, None), "firing");
        assert_eq!(effective_status(None, None, None), "unknown");
    }
}
