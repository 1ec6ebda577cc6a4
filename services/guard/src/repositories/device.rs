//! Device ledger repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use sqlx::PgPool;
use uuid::Uuid;

use super::DeviceLedger;
use crate::models::DeviceLedgerEntry;

#[derive(Clone)]
pub struct PgDeviceLedger {
    pool: PgPool,
}

impl PgDeviceLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceLedger for PgDeviceLedger {
    async fn record(&self, entry: &DeviceLedgerEntry) -> DatabaseResult<()> {
        // Clamp to the user's latest row so created_at stays monotonic even
        // when two requests carry slightly skewed clocks.
        sqlx::query(
            r#"
            INSERT INTO device_ledger (id, user_id, fingerprint, ip_address, user_agent, created_at)
            SELECT $1, $2, $3, $4, $5,
                   GREATEST($6, COALESCE(MAX(created_at), $6))
            FROM device_ledger
            WHERE user_id = $2
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(&entry.fingerprint)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    async fn count_distinct_devices(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> DatabaseResult<u32> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT fingerprint)
            FROM device_ledger
            WHERE user_id = $1 AND created_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        u32::try_from(count)
            .map_err(|_| DatabaseError::Decode(format!("device count out of range: {}", count)))
    }

    async fn has_device(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let seen: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM device_ledger
                WHERE user_id = $1 AND fingerprint = $2 AND created_at >= $3
            )
            "#,
        )
        .bind(user_id)
        .bind(fingerprint)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(seen)
    }

    async fn history(&self, user_id: Uuid, limit: u32) -> DatabaseResult<Vec<DeviceLedgerEntry>> {
        let entries = sqlx::query_as::<_, DeviceLedgerEntry>(
            r#"
            SELECT id, user_id, fingerprint, ip_address, user_agent, created_at
            FROM device_ledger
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

        Ok(entries)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        let result = sqlx::query("DELETE FROM device_ledger WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(result.rows_affected())
    }
}
