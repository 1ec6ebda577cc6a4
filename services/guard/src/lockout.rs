//! Account lockout policy and state transitions
//!
//! Two states exist per account: unlocked, and locked until an instant with
//! a reason. Expiry is decided at read time by comparing `lock_until` with
//! the request's server time, so no sweeper is needed to unlock accounts.

use chrono::{DateTime, Duration, Utc};
use common::error::DatabaseResult;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{BestEffort, SecurityAuditLog};
use crate::context::RequestContext;
use crate::error::{GuardError, GuardResult};
use crate::models::{LockInfo, SecurityEvent, SecurityEventDetails};
use crate::repositories::{AccountStore, DeviceLedger, SessionStore};

/// Lockout policy
#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    pub max_devices_per_day: u32,
    pub lock_duration_hours: u32,
    pub max_lock_duration_hours: u32,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_devices_per_day: 3,
            lock_duration_hours: 24,
            max_lock_duration_hours: 720,
        }
    }
}

/// Result of one velocity evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum LockDecision {
    Clear {
        devices_today: u32,
    },
    Locked {
        lock: LockInfo,
        devices_today: u32,
        sessions_removed: u64,
        /// False when the account was already locked before this evaluation
        newly_locked: bool,
    },
}

impl LockDecision {
    pub fn lock(&self) -> Option<&LockInfo> {
        match self {
            LockDecision::Clear { .. } => None,
            LockDecision::Locked { lock, .. } => Some(lock),
        }
    }

    pub fn devices_today(&self) -> u32 {
        match self {
            LockDecision::Clear { devices_today } | LockDecision::Locked { devices_today, .. } => {
                *devices_today
            }
        }
    }
}

/// Midnight UTC of the day containing `now`
pub fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

/// `now + hours`, with `hours` clamped to `max_hours` and the sum saturating
pub fn lock_expiry(now: DateTime<Utc>, hours: u32, max_hours: u32) -> DateTime<Utc> {
    Duration::try_hours(i64::from(hours.min(max_hours)))
        .and_then(|duration| now.checked_add_signed(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Lockout manager
#[derive(Clone)]
pub struct LockoutManager {
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn DeviceLedger>,
    audit: SecurityAuditLog,
    policy: LockoutPolicy,
}

impl LockoutManager {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<dyn SessionStore>,
        ledger: Arc<dyn DeviceLedger>,
        audit: SecurityAuditLog,
        policy: LockoutPolicy,
    ) -> Self {
        Self {
            accounts,
            sessions,
            ledger,
            audit,
            policy,
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Lock the account when today's distinct devices exceed the allowance.
    ///
    /// `unrecorded` is the fingerprint of the current login when its ledger
    /// write failed; it is still counted unless already seen today.
    ///
    /// Errors reading the device count or writing the lock are returned so
    /// the login path can fail closed. Session wipe and audit failures are
    /// logged only: the stored lock already denies the account.
    pub async fn evaluate(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        unrecorded: Option<&str>,
    ) -> DatabaseResult<LockDecision> {
        let since = start_of_utc_day(ctx.now);
        let mut devices_today = self.ledger.count_distinct_devices(user_id, since).await?;
        if let Some(fp) = unrecorded {
            if !self.ledger.has_device(user_id, fp, since).await? {
                devices_today = devices_today.saturating_add(1);
            }
        }

        if devices_today <= self.policy.max_devices_per_day {
            return Ok(LockDecision::Clear { devices_today });
        }

        let existing = self.accounts.lock_state(user_id).await?.active_at(ctx.now);
        let (lock, newly_locked) = match existing {
            Some(existing) => (existing, false),
            None => {
                let until = lock_expiry(
                    ctx.now,
                    self.policy.lock_duration_hours,
                    self.policy.max_lock_duration_hours,
                );
                let reason = format!(
                    "Signed in from {} different devices today; the limit is {}",
                    devices_today, self.policy.max_devices_per_day
                );
                self.accounts.set_lock(user_id, until, &reason, ctx.now).await?;
                (LockInfo { until, reason }, true)
            }
        };

        warn!(
            request_id = %ctx.request_id,
            user_id = %user_id,
            devices_today,
            "Device limit exceeded, account locked until {}", lock.until
        );

        let sessions_removed = self.wipe_sessions(ctx, user_id).await;

        if newly_locked {
            let event = SecurityEvent::new(
                ctx,
                user_id,
                format!(
                    "Account locked after sign-ins from {} devices in one day",
                    devices_today
                ),
                SecurityEventDetails::DeviceLimitExceeded {
                    devices_today,
                    max_devices: self.policy.max_devices_per_day,
                    lock_until: lock.until,
                    sessions_removed,
                },
            );
            self.audit.append(ctx, event).await;
        }

        Ok(LockDecision::Locked {
            lock,
            devices_today,
            sessions_removed,
            newly_locked,
        })
    }

    /// The lock in force at the request's time, if any; never writes
    pub async fn current_lock(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
    ) -> DatabaseResult<Option<LockInfo>> {
        Ok(self.accounts.lock_state(user_id).await?.active_at(ctx.now))
    }

    pub async fn is_locked(&self, ctx: &RequestContext, user_id: Uuid) -> DatabaseResult<bool> {
        Ok(self.current_lock(ctx, user_id).await?.is_some())
    }

    /// Administrative lock
    pub async fn lock(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        reason: &str,
        hours: u32,
    ) -> GuardResult<LockInfo> {
        if user_id.is_nil() {
            return Err(GuardError::InvalidInput("user id is required".to_string()));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(GuardError::InvalidInput("lock reason is required".to_string()));
        }
        if hours == 0 {
            return Err(GuardError::InvalidInput(
                "lock duration must be at least one hour".to_string(),
            ));
        }

        let until = lock_expiry(ctx.now, hours, self.policy.max_lock_duration_hours);
        self.accounts.set_lock(user_id, until, reason, ctx.now).await?;
        info!(
            request_id = %ctx.request_id,
            user_id = %user_id,
            "Account locked by administrator until {}", until
        );

        self.wipe_sessions(ctx, user_id).await;

        let event = SecurityEvent::new(
            ctx,
            user_id,
            format!("Account locked by administrator: {}", reason),
            SecurityEventDetails::AccountLocked {
                reason: reason.to_string(),
                lock_until: until,
                requested_hours: hours,
                actor: ctx.actor,
            },
        );
        self.audit.append(ctx, event).await;

        Ok(LockInfo {
            until,
            reason: reason.to_string(),
        })
    }

    /// Administrative unlock, effective immediately
    pub async fn unlock(&self, ctx: &RequestContext, user_id: Uuid) -> GuardResult<()> {
        if user_id.is_nil() {
            return Err(GuardError::InvalidInput("user id is required".to_string()));
        }

        let previous = self.accounts.lock_state(user_id).await?;
        self.accounts.clear_lock(user_id, ctx.now).await?;
        info!(
            request_id = %ctx.request_id,
            user_id = %user_id,
            "Account unlocked by administrator"
        );

        let event = SecurityEvent::new(
            ctx,
            user_id,
            "Account unlocked by administrator",
            SecurityEventDetails::AccountUnlocked {
                previous_lock_until: previous.lock_until,
                previous_reason: previous.lock_reason,
                actor: ctx.actor,
            },
        );
        self.audit.append(ctx, event).await;

        Ok(())
    }

    async fn wipe_sessions(&self, ctx: &RequestContext, user_id: Uuid) -> u64 {
        let result = self.sessions.delete_all_for_user(user_id).await;
        BestEffort::log_and_continue("Session wipe on lock", ctx, result)
            .ok()
            .unwrap_or(0)
    }
}
