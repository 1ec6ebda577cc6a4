//! Storage seams for sessions, the device ledger, the audit trail and
//! account lock state.
//!
//! Each store is an object-safe async trait so the engine can run against
//! PostgreSQL in production and against the in-memory implementations in
//! tests and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{DeviceLedgerEntry, LockState, SecurityEvent, Session};

pub mod account;
pub mod device;
pub mod event;
pub mod memory;
pub mod session;

pub use account::PgAccountStore;
pub use device::PgDeviceLedger;
pub use event::PgSecurityEventStore;
pub use memory::{
    MemoryAccountStore, MemoryDeviceLedger, MemorySecurityEventStore, MemorySessionStore,
};
pub use session::PgSessionStore;

/// Persisted active-session table
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a newly issued session
    async fn create(&self, session: &Session) -> DatabaseResult<()>;

    /// Sessions of `user_id` with `expires_at > now`
    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> DatabaseResult<Vec<Session>>;

    /// Look a session up by its bearer token
    async fn find_current(&self, token: &str) -> DatabaseResult<Option<Session>>;

    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Session>>;

    /// Delete sessions by id, returning how many rows went away
    async fn delete_many(&self, ids: &[Uuid]) -> DatabaseResult<u64>;

    async fn delete(&self, id: Uuid) -> DatabaseResult<bool>;

    async fn delete_all_for_user(&self, user_id: Uuid) -> DatabaseResult<u64>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> DatabaseResult<u64>;
}

/// Append-only per-login device history
#[async_trait]
pub trait DeviceLedger: Send + Sync {
    /// Append one entry; `created_at` never moves backwards for a user
    async fn record(&self, entry: &DeviceLedgerEntry) -> DatabaseResult<()>;

    /// Distinct fingerprints seen for `user_id` at or after `since`
    async fn count_distinct_devices(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> DatabaseResult<u32>;

    /// Whether `fingerprint` appears for `user_id` at or after `since`
    async fn has_device(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> DatabaseResult<bool>;

    /// Most recent entries first
    async fn history(&self, user_id: Uuid, limit: u32) -> DatabaseResult<Vec<DeviceLedgerEntry>>;

    /// Delete entries with `created_at < cutoff`
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64>;
}

/// Append-only security event trail
#[async_trait]
pub trait SecurityEventStore: Send + Sync {
    async fn append(&self, event: &SecurityEvent) -> DatabaseResult<()>;

    /// Most recent events first
    async fn query(&self, user_id: Uuid, limit: u32) -> DatabaseResult<Vec<SecurityEvent>>;

    /// Delete events with `created_at < cutoff`
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64>;
}

/// Lock columns of the account aggregate
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Current lock columns; an account with no row is unlocked
    async fn lock_state(&self, user_id: Uuid) -> DatabaseResult<LockState>;

    async fn set_lock(
        &self,
        user_id: Uuid,
        until: DateTime<Utc>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()>;

    async fn clear_lock(&self, user_id: Uuid, now: DateTime<Utc>) -> DatabaseResult<()>;
}

/// The four stores the engine runs against
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub ledger: Arc<dyn DeviceLedger>,
    pub events: Arc<dyn SecurityEventStore>,
    pub accounts: Arc<dyn AccountStore>,
}

impl Stores {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            sessions: Arc::new(PgSessionStore::new(pool.clone())),
            ledger: Arc::new(PgDeviceLedger::new(pool.clone())),
            events: Arc::new(PgSecurityEventStore::new(pool.clone())),
            accounts: Arc::new(PgAccountStore::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(MemorySessionStore::new()),
            ledger: Arc::new(MemoryDeviceLedger::new()),
            events: Arc::new(MemorySecurityEventStore::new()),
            accounts: Arc::new(MemoryAccountStore::new()),
        }
    }
}
