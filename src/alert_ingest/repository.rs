//! Alert repository
//!
//! Append-only event inserts plus group aggregation queries

use super::types::*;
use crate::error::Result;
use sqlx::PgPool;

/// Alert repository for database operations
#[derive(Clone)]
pub struct AlertRepository {
    pool: PgPool,
}

impl AlertRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    const EVENT_COLUMNS: &'static str = r#"
        id, receiver, group_key, notification_status, alert_status,
        alert_name, alert_uid, severity, stream_name, fingerprint, group_identifier,
        summary, description, starts_at, ends_at,
        labels, annotations, "values", raw_payload, received_at
    "#;

    /// Insert one alert event, returning its id
    pub async fn insert_event(&self, event: &NewAlertEvent) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO alert_webhook_events (
                receiver, group_key, notification_status, alert_status,
                alert_name, alert_uid, severity, stream_name, fingerprint, group_identifier,
                summary, description, starts_at, ends_at,
                labels, annotations, "values", raw_payload
            ) VALUES (
                $1, $2, $3, $4,
                $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14,
                $15, $16, $17, $18
            )
            RETURNING id
            "#,
        )
        .bind(&event.receiver)
        .bind(&event.group_key)
        .bind(&event.notification_status)
        .bind(&event.alert_status)
        .bind(&event.alert_name)
        .bind(&event.alert_uid)
        .bind(&event.severity)
        .bind(&event.stream_name)
        .bind(&event.fingerprint)
        .bind(&event.group_identifier)
        .bind(&event.summary)
        .bind(&event.description)
        .bind(event.starts_at)
        .bind(event.ends_at)
        .bind(&event.labels)
        .bind(&event.annotations)
        .bind(&event.values)
        .bind(&event.raw_payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Recent events, newest first
    pub async fn list_events(&self, limit: i64) -> Result<Vec<AlertEvent>> {
        let query = format!(
            "SELECT {} FROM alert_webhook_events ORDER BY received_at DESC LIMIT $1",
            Self::EVENT_COLUMNS
        );
        let events = sqlx::query_as::<_, AlertEvent>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(events)
    }

    /// Latest event per group (Postgres DISTINCT ON)
    pub async fn latest_event_per_group(&self) -> Result<Vec<AlertEvent>> {
        let query = format!(
            r#"
            SELECT DISTINCT ON (group_identifier) {}
            FROM alert_webhook_events
            ORDER BY group_identifier, received_at DESC
            "#,
            Self::EVENT_COLUMNS
        );
        let events = sqlx::query_as::<_, AlertEvent>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(events)
    }

    /// Per-group counts and recency, including the newest firing-class event
    pub async fn group_aggregates(&self) -> Result<Vec<GroupAggregate>> {
        let aggregates = sqlx::query_as::<_, GroupAggregate>(
            r#"
            SELECT
                group_identifier,
                count(*) AS event_count,
                max(received_at) AS last_received_at,
                max(received_at) FILTER (
                    WHERE lower(alert_status) IN ('firing', 'alerting', 'pending')
                ) AS last_firing_at
            FROM alert_webhook_events
            GROUP BY group_identifier
            ORDER BY max(received_at) DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(aggregates)
    }

    /// All manual resolution records
    pub async fn list_group_states(&self) -> Result<Vec<AlertGroupState>> {
        let states = sqlx::query_as::<_, AlertGroupState>(
            "SELECT identifier, resolved, resolved_at, updated_at \
             FROM alert_group_states ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(states)
    }

    /// Upsert a manual resolution record
    pub async fn upsert_group_state(
        &self,
        identifier: &str,
        resolved: bool,
    ) -> Result<AlertGroupState> {
        let state = sqlx::query_as::<_, AlertGroupState>(
            r#"
            INSERT INTO alert_group_states (identifier, resolved, resolved_at, updated_at)
            VALUES ($1, $2, CASE WHEN $2 THEN NOW() ELSE NULL END, NOW())
            ON CONFLICT (identifier) DO UPDATE SET
                resolved = EXCLUDED.resolved,
                resolved_at = EXCLUDED.resolved_at,
                updated_at = NOW()
            RETURNING identifier, resolved, resolved_at, updated_at
            "#,
        )
        .bind(identifier)
        .bind(resolved)
        .fetch_one(&self.pool)
        .await?;
        Ok(state)
    }
}
