//! Idempotent table setup run at startup

use common::error::{DatabaseError, DatabaseResult};
use sqlx::PgPool;
use tracing::info;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        user_id UUID PRIMARY KEY,
        lock_until TIMESTAMPTZ NULL,
        lock_reason TEXT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT accounts_lock_has_reason
            CHECK (lock_until IS NULL OR (lock_reason IS NOT NULL AND lock_reason <> ''))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id UUID PRIMARY KEY,
        token_hash TEXT NOT NULL UNIQUE,
        user_id UUID NOT NULL,
        ip_address TEXT NOT NULL,
        user_agent TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sessions_user_expires ON sessions (user_id, expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS device_ledger (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        fingerprint TEXT NOT NULL,
        ip_address TEXT NOT NULL,
        user_agent TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_device_ledger_user_created ON device_ledger (user_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS security_events (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        event_type TEXT NOT NULL,
        description TEXT NOT NULL,
        ip_address TEXT NOT NULL,
        user_agent TEXT NOT NULL,
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_security_events_user_created ON security_events (user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_security_events_created ON security_events (created_at)",
];

/// Create the guard tables and indexes if they do not exist yet
pub async fn ensure_schema(pool: &PgPool) -> DatabaseResult<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
    }

    info!("Database schema is up to date");
    Ok(())
}
