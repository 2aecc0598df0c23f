//! Alert ingest service
//!
//! Envelope parsing, event extraction, and the derived group view

use super::repository::AlertRepository;
use super::types::*;
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Alert service for ingest and group queries
pub struct AlertService {
    repo: AlertRepository,
}

impl AlertService {
    pub fn new(repo: AlertRepository) -> Self {
        Self { repo }
    }

    /// Ingest a raw webhook payload. Returns the number of stored events.
    ///
    /// The raw envelope is preserved verbatim on every row; known fields are
    /// extracted best-effort. Manual group state is never touched on ingest.
    pub async fn ingest(&self, raw: Value) -> Result<usize> {
        let envelope: WebhookEnvelope = serde_json::from_value(raw.clone())
            .map_err(|e| Error::Validation(format!("unrecognized alert envelope: {}", e)))?;

        let mut stored = 0;
        for alert in &envelope.alerts {
            let event = extract_event(&envelope, alert, &raw);
            let id = self.repo.insert_event(&event).await?;
            stored += 1;

            tracing::info!(
                event_id = id,
                alert_name = event.alert_name.as_deref().unwrap_or("unknown"),
                group_identifier = %event.group_identifier,
                alert_status = event.alert_status.as_deref().unwrap_or("unknown"),
                severity = event.severity.as_deref().unwrap_or("unknown"),
                "Alert event stored"
            );
        }

        if stored == 0 {
            tracing::warn!("Alert envelope contained no alerts");
        }

        Ok(stored)
    }

    /// Recent events, newest first
    pub async fn list_events(&self, limit: i64) -> Result<Vec<AlertEvent>> {
        self.repo.list_events(limit.clamp(1, 1000)).await
    }

    /// Derived group view with manual resolution applied
    pub async fn groups(&self) -> Result<Vec<AlertGroupView>> {
        let latest = self.repo.latest_event_per_group().await?;
        let aggregates = self.repo.group_aggregates().await?;
        let states: HashMap<String, AlertGroupState> = self
            .repo
            .list_group_states()
            .await?
            .into_iter()
            .map(|s| (s.identifier.clone(), s))
            .collect();

        let latest_by_group: HashMap<String, AlertEvent> = latest
            .into_iter()
            .map(|e| (e.group_identifier.clone(), e))
            .collect();

        let mut views = Vec::with_capacity(aggregates.len());
        for agg in aggregates {
            let Some(event) = latest_by_group.get(&agg.group_identifier) else {
                continue;
            };
            let manual = states.get(&agg.group_identifier);
            let status = effective_status(
                event.alert_status.as_deref(),
                manual,
                agg.last_firing_at,
            );
            views.push(AlertGroupView {
                identifier: agg.group_identifier,
                alert_name: event.alert_name.clone(),
                stream_name: event.stream_name.clone(),
                latest_status: event.alert_status.clone(),
                latest_severity: event.severity.clone(),
                status,
                event_count: agg.event_count,
                last_received_at: agg.last_received_at,
                resolved_at: manual.and_then(|s| s.resolved_at),
            });
        }
        Ok(views)
    }

    /// All manual resolution records
    pub async fn list_group_states(&self) -> Result<Vec<AlertGroupState>> {
        self.repo.list_group_states().await
    }

    /// Manually mark a group resolved (or clear the mark)
    pub async fn upsert_group_state(
        &self,
        req: &UpsertGroupStateRequest,
    ) -> Result<AlertGroupState> {
        if req.identifier.is_empty() || req.identifier.len() > 1024 {
            return Err(Error::Validation(
                "identifier must be 1-1024 characters".to_string(),
            ));
        }
        self.repo
            .upsert_group_state(&req.identifier, req.resolved)
            .await
    }
}

/// Build an insertable event from one alert of the envelope
fn extract_event(envelope: &WebhookEnvelope, alert: &WebhookAlert, raw: &Value) -> NewAlertEvent {
    let alert_name = alert.labels.get("alertname").cloned();
    let stream_name = alert.labels.get("stream_name").cloned();
    let severity = alert.labels.get("severity").map(|s| normalize_severity(s));
    let alert_uid = alert
        .labels
        .get("__alert_rule_uid__")
        .or_else(|| alert.labels.get("alert_uid"))
        .cloned();

    let group_identifier = derive_identifier(
        alert.fingerprint.as_deref(),
        alert_name.as_deref(),
        stream_name.as_deref(),
        severity.as_deref(),
    );

    NewAlertEvent {
        receiver: envelope.receiver.clone(),
        group_key: envelope.group_key.clone(),
        notification_status: envelope.status.clone(),
        alert_status: alert.status.clone(),
        alert_name,
        alert_uid,
        severity,
        stream_name,
        fingerprint: alert.fingerprint.clone(),
        group_identifier,
        summary: alert.annotations.get("summary").cloned(),
        description: alert.annotations.get("description").cloned(),
        starts_at: WebhookAlert::parse_ts(alert.starts_at.as_deref()),
        ends_at: WebhookAlert::parse_ts(alert.ends_at.as_deref()),
        labels: serde_json::to_value(&alert.labels).unwrap_or_default(),
        annotations: serde_json::to_value(&alert.annotations).unwrap_or_default(),
        values: alert.values.clone().unwrap_or_else(|| Value::Object(Default::default())),
        raw_payload: raw.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_event_fields() {
        let raw = serde_json::json!({
            "receiver": "vectorflow",
            "status": "firing",
            "groupKey": "gk",
            "alerts": [{
                "status": "firing",
                "labels": {
                    "alertname": "WorkerDown",
                    "severity": "HIGH",
                    "stream_name": "dock-cam",
                    "__alert_rule_uid__": "uid-1"
                },
                "annotations": {
                    "summary": "worker stopped publishing",
                    "description": "no frames for 30s"
                },
                "startsAt": "2025-07-01T09:00:00Z",
                "fingerprint": "fp-9"
            }]
        });
        let envelope: WebhookEnvelope = serde_json::from_value(raw.clone()).unwrap();
        let event = extract_event(&envelope, &envelope.alerts[0], &raw);

        assert_eq!(event.alert_name.as_deref(), Some("WorkerDown"));
        assert_eq!(event.severity.as_deref(), Some("critical"));
        assert_eq!(event.stream_name.as_deref(), Some("dock-cam"));
        assert_eq!(event.alert_uid.as_deref(), Some("uid-1"));
        assert_eq!(event.group_identifier, "fp-9");
        assert_eq!(event.summary.as_deref(), Some("worker stopped publishing"));
        assert!(event.starts_at.is_some());
        assert!(event.ends_at.is_none());
        assert_eq!(event.raw_payload, raw);
    }

    #[test]
    fn test_extract_event_without_fingerprint_uses_composite() {
        let raw = serde_json::json!({
            "alerts": [{
                "status": "firing",
                "labels": { "alertname": "HighFlow", "severity": "warn" }
            }]
        });
        let envelope: WebhookEnvelope = serde_json::from_value(raw.clone()).unwrap();
        let event = extract_event(&envelope, &envelope.alerts[0], &raw);
        assert_eq!(event.group_identifier, "HighFlow|unknown|warning");
    }
}
