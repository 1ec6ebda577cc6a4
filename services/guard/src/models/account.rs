//! Lock state embedded on the account aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted lock columns of an account.
///
/// Both fields are set together or cleared together; a stored lock always
/// carries a non-empty reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub lock_until: Option<DateTime<Utc>>,
    pub lock_reason: Option<String>,
}

/// A lock that is in force at some instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub until: DateTime<Utc>,
    pub reason: String,
}

impl LockState {
    pub fn unlocked() -> Self {
        Self::default()
    }

    pub fn locked(until: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            lock_until: Some(until),
            lock_reason: Some(reason.into()),
        }
    }

    /// The lock in force at `now`, if any.
    ///
    /// A `lock_until` at or before `now` counts as expired; nothing is
    /// written back, expiry is purely a read-time interpretation.
    pub fn active_at(&self, now: DateTime<Utc>) -> Option<LockInfo> {
        match (&self.lock_until, &self.lock_reason) {
            (Some(until), Some(reason)) if *until > now => Some(LockInfo {
                until: *until,
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

impl LockInfo {
    /// Whole seconds left on the lock, never negative
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.until - now).num_seconds().max(0)
    }
}
