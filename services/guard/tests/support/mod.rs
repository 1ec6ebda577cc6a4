//! Shared fixtures for the guard integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::error::{DatabaseError, DatabaseResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use guard::context::RequestContext;
use guard::lockout::LockoutPolicy;
use guard::models::{DeviceLedgerEntry, LockState, NewSession, SecurityEvent, Session};
use guard::repositories::{
    AccountStore, DeviceLedger, MemoryAccountStore, MemoryDeviceLedger, SecurityEventStore,
    SessionStore, Stores,
};
use guard::service::SecurityService;

pub const LAPTOP: (&str, &str) = ("198.51.100.10", "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0");
pub const PHONE: (&str, &str) = ("203.0.113.20", "Mozilla/5.0 (iPhone) Safari/17.0");
pub const TABLET: (&str, &str) = ("192.0.2.30", "Mozilla/5.0 (iPad) Safari/17.0");
pub const DESKTOP: (&str, &str) = ("203.0.113.40", "Mozilla/5.0 (Windows NT 10.0) Edge/126.0");

/// Midday, so a few minutes either way stay inside the same UTC day
pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
}

pub fn ctx(device: (&str, &str), now: DateTime<Utc>) -> RequestContext {
    RequestContext::new(device.0, device.1).at(now)
}

pub fn new_session(user_id: Uuid, token: &str, ctx: &RequestContext) -> NewSession {
    NewSession {
        user_id,
        token: token.to_string(),
        expires_at: ctx.now + Duration::hours(8),
    }
}

pub fn offline<T>() -> DatabaseResult<T> {
    Err(DatabaseError::Unavailable("store offline".to_string()))
}

/// In-memory engine with a handle on the concrete account store
pub struct Harness {
    pub service: SecurityService,
    pub stores: Stores,
    pub accounts: Arc<MemoryAccountStore>,
}

pub fn harness() -> Harness {
    harness_with_policy(LockoutPolicy::default())
}

pub fn harness_with_policy(policy: LockoutPolicy) -> Harness {
    let mut stores = Stores::in_memory();
    let accounts = Arc::new(MemoryAccountStore::new());
    stores.accounts = accounts.clone();
    let service = SecurityService::builder(stores.clone()).policy(policy).build();

    Harness {
        service,
        stores,
        accounts,
    }
}

/// Engine over arbitrary, possibly failing, stores
pub fn service_over(stores: Stores) -> SecurityService {
    SecurityService::builder(stores).build()
}

impl Harness {
    /// Store a session for `device` and run enforcement for it
    pub async fn login(
        &self,
        user_id: Uuid,
        token: &str,
        device: (&str, &str),
        now: DateTime<Utc>,
    ) -> guard::error::GuardResult<guard::service::LoginOutcome> {
        let ctx = ctx(device, now);
        self.service
            .register_login(&ctx, new_session(user_id, token, &ctx))
            .await
    }

    pub async fn active_sessions(&self, user_id: Uuid, now: DateTime<Utc>) -> Vec<Session> {
        self.stores.sessions.list_active(user_id, now).await.unwrap()
    }

    pub async fn events(&self, user_id: Uuid) -> Vec<SecurityEvent> {
        self.stores.events.query(user_id, 100).await.unwrap()
    }
}

pub struct OfflineSessionStore;

#[async_trait]
impl SessionStore for OfflineSessionStore {
    async fn create(&self, _session: &Session) -> DatabaseResult<()> {
        offline()
    }

    async fn list_active(
        &self,
        _user_id: Uuid,
        _now: DateTime<Utc>,
    ) -> DatabaseResult<Vec<Session>> {
        offline()
    }

    async fn find_current(&self, _token: &str) -> DatabaseResult<Option<Session>> {
        offline()
    }

    async fn find_by_id(&self, _id: Uuid) -> DatabaseResult<Option<Session>> {
        offline()
    }

    async fn delete_many(&self, _ids: &[Uuid]) -> DatabaseResult<u64> {
        offline()
    }

    async fn delete(&self, _id: Uuid) -> DatabaseResult<bool> {
        offline()
    }

    async fn delete_all_for_user(&self, _user_id: Uuid) -> DatabaseResult<u64> {
        offline()
    }

    async fn delete_expired(&self, _now: DateTime<Utc>) -> DatabaseResult<u64> {
        offline()
    }
}

pub struct OfflineLedger;

#[async_trait]
impl DeviceLedger for OfflineLedger {
    async fn record(&self, _entry: &DeviceLedgerEntry) -> DatabaseResult<()> {
        offline()
    }

    async fn count_distinct_devices(
        &self,
        _user_id: Uuid,
        _since: DateTime<Utc>,
    ) -> DatabaseResult<u32> {
        offline()
    }

    async fn has_device(
        &self,
        _user_id: Uuid,
        _fingerprint: &str,
        _since: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        offline()
    }

    async fn history(&self, _user_id: Uuid, _limit: u32) -> DatabaseResult<Vec<DeviceLedgerEntry>> {
        offline()
    }

    async fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        offline()
    }
}

/// Ledger that reads fine and refuses appends while `refusing` is set
#[derive(Default)]
pub struct FlakyLedger {
    inner: MemoryDeviceLedger,
    refusing: AtomicBool,
}

impl FlakyLedger {
    pub fn refusing() -> Self {
        let ledger = Self::default();
        ledger.refuse_writes(true);
        ledger
    }

    pub fn refuse_writes(&self, refuse: bool) {
        self.refusing.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceLedger for FlakyLedger {
    async fn record(&self, entry: &DeviceLedgerEntry) -> DatabaseResult<()> {
        if self.refusing.load(Ordering::SeqCst) {
            return offline();
        }
        self.inner.record(entry).await
    }

    async fn count_distinct_devices(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> DatabaseResult<u32> {
        self.inner.count_distinct_devices(user_id, since).await
    }

    async fn has_device(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        self.inner.has_device(user_id, fingerprint, since).await
    }

    async fn history(&self, user_id: Uuid, limit: u32) -> DatabaseResult<Vec<DeviceLedgerEntry>> {
        self.inner.history(user_id, limit).await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        self.inner.purge_older_than(cutoff).await
    }
}

pub struct OfflineEventStore;

#[async_trait]
impl SecurityEventStore for OfflineEventStore {
    async fn append(&self, _event: &SecurityEvent) -> DatabaseResult<()> {
        offline()
    }

    async fn query(&self, _user_id: Uuid, _limit: u32) -> DatabaseResult<Vec<SecurityEvent>> {
        offline()
    }

    async fn purge_older_than(&self, _cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        offline()
    }
}

pub struct OfflineAccountStore;

#[async_trait]
impl AccountStore for OfflineAccountStore {
    async fn lock_state(&self, _user_id: Uuid) -> DatabaseResult<LockState> {
        offline()
    }

    async fn set_lock(
        &self,
        _user_id: Uuid,
        _until: DateTime<Utc>,
        _reason: &str,
        _now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        offline()
    }

    async fn clear_lock(&self, _user_id: Uuid, _now: DateTime<Utc>) -> DatabaseResult<()> {
        offline()
    }
}
