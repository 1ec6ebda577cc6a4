//! In-memory store implementations
//! Suitable for development and testing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{AccountStore, DeviceLedger, SecurityEventStore, SessionStore};
use crate::models::{DeviceLedgerEntry, LockState, SecurityEvent, Session, hash_token};

/// In-memory session table
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &Session) -> DatabaseResult<()> {
        let mut sessions = self.sessions.write().await;
        debug!("Storing session {} for user {}", session.id, session.user_id);
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> DatabaseResult<Vec<Session>> {
        let sessions = self.sessions.read().await;
        let mut active: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active_at(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }

    async fn find_current(&self, token: &str) -> DatabaseResult<Option<Session>> {
        let token_hash = hash_token(token);
        let sessions = self.sessions.read().await;
        Ok(sessions.values().find(|s| s.token_hash == token_hash).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id).cloned())
    }

    async fn delete_many(&self, ids: &[Uuid]) -> DatabaseResult<u64> {
        let mut sessions = self.sessions.write().await;
        let removed = ids.iter().filter(|id| sessions.remove(*id).is_some()).count();
        Ok(removed as u64)
    }

    async fn delete(&self, id: Uuid) -> DatabaseResult<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(&id).is_some())
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> DatabaseResult<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - sessions.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> DatabaseResult<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.is_active_at(now));
        Ok((before - sessions.len()) as u64)
    }
}

/// In-memory device ledger
#[derive(Default)]
pub struct MemoryDeviceLedger {
    entries: Arc<RwLock<Vec<DeviceLedgerEntry>>>,
}

impl MemoryDeviceLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceLedger for MemoryDeviceLedger {
    async fn record(&self, entry: &DeviceLedgerEntry) -> DatabaseResult<()> {
        let mut entries = self.entries.write().await;
        let latest = entries
            .iter()
            .filter(|e| e.user_id == entry.user_id)
            .map(|e| e.created_at)
            .max();

        let mut entry = entry.clone();
        if let Some(latest) = latest {
            entry.created_at = entry.created_at.max(latest);
        }
        entries.push(entry);
        Ok(())
    }

    async fn count_distinct_devices(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> DatabaseResult<u32> {
        let entries = self.entries.read().await;
        let distinct: HashSet<&str> = entries
            .iter()
            .filter(|e| e.user_id == user_id && e.created_at >= since)
            .map(|e| e.fingerprint.as_str())
            .collect();
        Ok(distinct.len() as u32)
    }

    async fn has_device(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .any(|e| e.user_id == user_id && e.fingerprint == fingerprint && e.created_at >= since))
    }

    async fn history(&self, user_id: Uuid, limit: u32) -> DatabaseResult<Vec<DeviceLedgerEntry>> {
        let entries = self.entries.read().await;
        // Insertion order is creation order, so walking backwards is newest-first.
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.created_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

/// In-memory security event trail
#[derive(Default)]
pub struct MemorySecurityEventStore {
    events: Arc<RwLock<Vec<SecurityEvent>>>,
}

impl MemorySecurityEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecurityEventStore for MemorySecurityEventStore {
    async fn append(&self, event: &SecurityEvent) -> DatabaseResult<()> {
        let mut events = self.events.write().await;
        debug!("Storing security event {} for user {}", event.event_type(), event.user_id);
        events.push(event.clone());
        Ok(())
    }

    async fn query(&self, user_id: Uuid, limit: u32) -> DatabaseResult<Vec<SecurityEvent>> {
        let events = self.events.read().await;
        let mut matching: Vec<SecurityEvent> = events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        // Stable sort keeps append order among events sharing a timestamp.
        matching.reverse();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| e.created_at >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

/// In-memory account lock columns
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Arc<RwLock<HashMap<Uuid, LockState>>>,
    writes: AtomicU64,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lock writes performed so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn lock_state(&self, user_id: Uuid) -> DatabaseResult<LockState> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&user_id).cloned().unwrap_or_default())
    }

    async fn set_lock(
        &self,
        user_id: Uuid,
        until: DateTime<Utc>,
        reason: &str,
        _now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(user_id, LockState::locked(until, reason));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear_lock(&self, user_id: Uuid, _now: DateTime<Utc>) -> DatabaseResult<()> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(user_id, LockState::unlocked());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
