//! Security service facade
//!
//! Wires the stores into the lockout manager, the enforcer, the gate and
//! the retention purge, and exposes the operations the HTTP layer calls.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::audit::SecurityAuditLog;
use crate::context::RequestContext;
use crate::enforcer::{AdvisoryLock, EnforcementOutcome, SessionEnforcer};
use crate::error::{GuardError, GuardResult};
use crate::gate::{GateDecision, SecurityGate, SecurityStatus};
use crate::geo::GeoTracker;
use crate::lockout::{LockoutManager, LockoutPolicy};
use crate::models::{
    DeviceLedgerEntry, LockInfo, NewSession, SecurityEvent, SecurityEventDetails, Session,
};
use crate::purge::{DEFAULT_DAYS_TO_KEEP, RetentionPurge, RetentionReport};
use crate::repositories::{DeviceLedger, SessionStore, Stores};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Clamp a caller-supplied page size into `1..=MAX_PAGE_SIZE`
pub fn page_size(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// A login that passed enforcement
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session: Session,
    pub enforcement: EnforcementOutcome,
}

/// Builder for [`SecurityService`]
pub struct SecurityServiceBuilder {
    stores: Stores,
    policy: LockoutPolicy,
    retention_days: u32,
    geo: Option<GeoTracker>,
    advisory: Option<(Arc<dyn AdvisoryLock>, Duration)>,
}

impl SecurityServiceBuilder {
    pub fn policy(mut self, policy: LockoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn geo(mut self, tracker: GeoTracker) -> Self {
        self.geo = Some(tracker);
        self
    }

    pub fn advisory_lock(mut self, lock: Arc<dyn AdvisoryLock>, ttl: Duration) -> Self {
        self.advisory = Some((lock, ttl));
        self
    }

    pub fn build(self) -> SecurityService {
        let Stores {
            sessions,
            ledger,
            events,
            accounts,
        } = self.stores;

        let audit = SecurityAuditLog::new(events, ledger.clone());
        let lockout = LockoutManager::new(
            accounts,
            sessions.clone(),
            ledger.clone(),
            audit.clone(),
            self.policy,
        );

        let mut enforcer =
            SessionEnforcer::new(sessions.clone(), ledger.clone(), audit.clone(), lockout.clone());
        if let Some(tracker) = self.geo {
            enforcer = enforcer.with_geo(tracker);
        }
        if let Some((lock, ttl)) = self.advisory {
            enforcer = enforcer.with_advisory_lock(lock, ttl);
        }

        SecurityService {
            gate: SecurityGate::new(lockout.clone(), ledger.clone()),
            purge: RetentionPurge::new(audit.clone(), sessions.clone(), self.retention_days),
            sessions,
            ledger,
            audit,
            lockout,
            enforcer,
        }
    }
}

/// Security service
#[derive(Clone)]
pub struct SecurityService {
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn DeviceLedger>,
    audit: SecurityAuditLog,
    lockout: LockoutManager,
    enforcer: SessionEnforcer,
    gate: SecurityGate,
    purge: RetentionPurge,
}

impl SecurityService {
    pub fn builder(stores: Stores) -> SecurityServiceBuilder {
        SecurityServiceBuilder {
            stores,
            policy: LockoutPolicy::default(),
            retention_days: DEFAULT_DAYS_TO_KEEP,
            geo: None,
            advisory: None,
        }
    }

    pub fn retention(&self) -> &RetentionPurge {
        &self.purge
    }

    pub fn policy(&self) -> &LockoutPolicy {
        self.lockout.policy()
    }

    /// Accept a session just issued by the identity provider.
    ///
    /// A locked account is refused before anything is written. Otherwise the
    /// session is stored and enforcement runs; if enforcement locks the
    /// account the new session is already gone and the login is refused.
    pub async fn register_login(
        &self,
        ctx: &RequestContext,
        new_session: NewSession,
    ) -> GuardResult<LoginOutcome> {
        if new_session.user_id.is_nil() {
            return Err(GuardError::InvalidInput("user id is required".to_string()));
        }
        if new_session.token.trim().is_empty() {
            return Err(GuardError::InvalidInput("session token is required".to_string()));
        }
        if new_session.expires_at <= ctx.now {
            return Err(GuardError::InvalidInput("session is already expired".to_string()));
        }

        let existing = self
            .lockout
            .current_lock(ctx, new_session.user_id)
            .await
            .map_err(GuardError::LockEvaluation)?;
        if let Some(lock) = existing {
            info!(
                request_id = %ctx.request_id,
                user_id = %new_session.user_id,
                "Login refused, account locked until {}", lock.until
            );
            return Err(GuardError::AccountLocked { lock, at: ctx.now });
        }

        let session = Session::issue(&new_session, ctx);
        self.sessions.create(&session).await?;

        let enforcement = self
            .enforcer
            .enforce(ctx, new_session.user_id, &new_session.token)
            .await?;

        if let Some(lock) = enforcement.lock.clone() {
            return Err(GuardError::AccountLocked { lock, at: ctx.now });
        }

        Ok(LoginOutcome { session, enforcement })
    }

    pub async fn enforce_single_session(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        current_token: &str,
    ) -> GuardResult<EnforcementOutcome> {
        self.enforcer.enforce(ctx, user_id, current_token).await
    }

    pub async fn security_status(&self, ctx: &RequestContext, user_id: Uuid) -> SecurityStatus {
        self.gate.status(ctx, user_id).await
    }

    pub async fn check_access(&self, ctx: &RequestContext, user_id: Uuid) -> GateDecision {
        self.gate.check(ctx, user_id).await
    }

    pub async fn is_locked(&self, ctx: &RequestContext, user_id: Uuid) -> GuardResult<bool> {
        Ok(self.lockout.is_locked(ctx, user_id).await?)
    }

    pub async fn lock_account(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        reason: &str,
        hours: u32,
    ) -> GuardResult<LockInfo> {
        self.lockout.lock(ctx, user_id, reason, hours).await
    }

    pub async fn unlock_account(&self, ctx: &RequestContext, user_id: Uuid) -> GuardResult<()> {
        self.lockout.unlock(ctx, user_id).await
    }

    /// Active sessions of `user_id`, newest first
    pub async fn session_list(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
    ) -> GuardResult<Vec<Session>> {
        Ok(self.sessions.list_active(user_id, ctx.now).await?)
    }

    /// End one of the caller's own sessions; another user's session is
    /// reported as missing
    pub async fn terminate_session(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        session_id: Uuid,
    ) -> GuardResult<()> {
        let session = match self.sessions.find_by_id(session_id).await? {
            Some(session) if session.user_id == user_id => session,
            _ => return Err(GuardError::NotFound),
        };

        if !self.sessions.delete(session.id).await? {
            return Err(GuardError::NotFound);
        }

        let event = SecurityEvent::new(
            ctx,
            user_id,
            "Session ended by its owner",
            SecurityEventDetails::SessionTerminated {
                session_id: session.id,
                session_ip_address: session.ip_address.clone(),
                session_user_agent: session.user_agent.clone(),
                session_created_at: session.created_at,
                replaced_by_fingerprint: None,
                replaced_by_ip_address: ctx.ip_address.clone(),
            },
        )
        .with_origin(&session.ip_address, &session.user_agent);
        self.audit.append(ctx, event).await;

        Ok(())
    }

    /// Delete the caller's session behind `token`
    pub async fn logout(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        token: &str,
    ) -> GuardResult<()> {
        let session = match self.sessions.find_current(token).await? {
            Some(session) if session.user_id == user_id => session,
            _ => return Err(GuardError::NotFound),
        };

        self.sessions.delete(session.id).await?;

        let event = SecurityEvent::new(
            ctx,
            session.user_id,
            "Signed out",
            SecurityEventDetails::Logout {
                session_id: session.id,
            },
        );
        self.audit.append(ctx, event).await;

        Ok(())
    }

    pub async fn device_history(
        &self,
        user_id: Uuid,
        limit: Option<u32>,
    ) -> GuardResult<Vec<DeviceLedgerEntry>> {
        Ok(self.ledger.history(user_id, page_size(limit)).await?)
    }

    pub async fn security_events(
        &self,
        user_id: Uuid,
        limit: Option<u32>,
    ) -> GuardResult<Vec<SecurityEvent>> {
        Ok(self.audit.query(user_id, page_size(limit)).await?)
    }

    /// Retention sweep; `None` keeps the configured default, zero days is refused
    pub async fn purge(
        &self,
        ctx: &RequestContext,
        days_to_keep: Option<u32>,
    ) -> GuardResult<RetentionReport> {
        if days_to_keep == Some(0) {
            return Err(GuardError::InvalidInput(
                "days_to_keep must be at least one day".to_string(),
            ));
        }
        Ok(self.purge.run(ctx, days_to_keep).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(Some(0)), 1);
        assert_eq!(page_size(Some(5_000)), MAX_PAGE_SIZE);
    }
}
