//! Security event repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::SecurityEventStore;
use crate::models::{SecurityEvent, SecurityEventDetails};

#[derive(Clone)]
pub struct PgSecurityEventStore {
    pool: PgPool,
}

impl PgSecurityEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn event_from_row(row: PgRow) -> DatabaseResult<SecurityEvent> {
    let event_type: String = row.get("event_type");
    let metadata: Value = row.get("metadata");
    let details = SecurityEventDetails::from_parts(&event_type, metadata)
        .map_err(|e| DatabaseError::Decode(format!("security event {}: {}", event_type, e)))?;

    Ok(SecurityEvent {
        id: row.get("id"),
        user_id: row.get("user_id"),
        description: row.get("description"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        details,
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl SecurityEventStore for PgSecurityEventStore {
    async fn append(&self, event: &SecurityEvent) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO security_events
                (id, user_id, event_type, description, ip_address, user_agent, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.event_type().as_str())
        .bind(&event.description)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(event.details.metadata())
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    async fn query(&self, user_id: Uuid, limit: u32) -> DatabaseResult<Vec<SecurityEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, event_type, description, ip_address, user_agent, metadata, created_at
            FROM security_events
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        rows.into_iter().map(event_from_row).collect()
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        let result = sqlx::query("DELETE FROM security_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(result.rows_affected())
    }
}
