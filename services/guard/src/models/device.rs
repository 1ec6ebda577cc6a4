//! Device ledger entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row per login, never mutated once written
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeviceLedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub fingerprint: String,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

impl DeviceLedgerEntry {
    pub fn new(
        user_id: Uuid,
        fingerprint: impl Into<String>,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            fingerprint: fingerprint.into(),
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            created_at,
        }
    }
}
