//! Account lock state repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use super::AccountStore;
use crate::models::LockState;

#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn lock_state(&self, user_id: Uuid) -> DatabaseResult<LockState> {
        let row = sqlx::query("SELECT lock_until, lock_reason FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        Ok(match row {
            Some(row) => LockState {
                lock_until: row.get("lock_until"),
                lock_reason: row.get("lock_reason"),
            },
            None => LockState::unlocked(),
        })
    }

    async fn set_lock(
        &self,
        user_id: Uuid,
        until: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        info!("Locking account {} until {}", user_id, until);

        sqlx::query(
            r#"
            INSERT INTO accounts (user_id, lock_until, lock_reason, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET lock_until = EXCLUDED.lock_until,
                lock_reason = EXCLUDED.lock_reason,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(until)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    async fn clear_lock(&self, user_id: Uuid, now: DateTime<Utc>) -> DatabaseResult<()> {
        info!("Clearing lock on account {}", user_id);

        sqlx::query(
            r#"
            UPDATE accounts
            SET lock_until = NULL, lock_reason = NULL, updated_at = $2
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(())
    }
}
