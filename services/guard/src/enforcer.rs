//! Login-time single-session enforcement
//!
//! Runs after the identity provider has authenticated a user and the new
//! session row exists. Bookkeeping (ledger, audit, terminating the other
//! sessions) is best effort; the velocity check that follows is not.

use async_trait::async_trait;
use common::cache::RedisPool;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{BestEffort, SecurityAuditLog};
use crate::context::RequestContext;
use crate::error::{GuardError, GuardResult};
use crate::fingerprint::fingerprint;
use crate::geo::GeoTracker;
use crate::lockout::LockoutManager;
use crate::models::{DeviceLedgerEntry, LockInfo, SecurityEvent, SecurityEventDetails, Session};
use crate::repositories::{DeviceLedger, SessionStore};

const ADVISORY_KEY_PREFIX: &str = "session_guard:enforce:";
const ADVISORY_ATTEMPTS: u32 = 3;
const ADVISORY_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Short-lived per-key mutual exclusion shared between service instances
#[async_trait]
pub trait AdvisoryLock: Send + Sync {
    /// Claim `key` for `owner`; false when someone else holds it
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> anyhow::Result<bool>;

    async fn release(&self, key: &str, owner: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl AdvisoryLock for RedisPool {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> anyhow::Result<bool> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        RedisPool::try_acquire(self, key, owner, ttl_ms).await
    }

    async fn release(&self, key: &str, owner: &str) -> anyhow::Result<()> {
        if !RedisPool::release(self, key, owner).await? {
            debug!("Advisory claim {} had already expired", key);
        }
        Ok(())
    }
}

/// What one enforcement pass did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnforcementOutcome {
    /// Other sessions removed because of this login
    pub terminated_count: u64,
    pub devices_today: u32,
    /// Set when the velocity check locked (or found locked) the account
    pub lock: Option<LockInfo>,
}

impl EnforcementOutcome {
    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }
}

struct Claim {
    key: String,
    owner: String,
}

/// Session enforcer
#[derive(Clone)]
pub struct SessionEnforcer {
    sessions: Arc<dyn SessionStore>,
    ledger: Arc<dyn DeviceLedger>,
    audit: SecurityAuditLog,
    lockout: LockoutManager,
    geo: Option<GeoTracker>,
    advisory: Option<(Arc<dyn AdvisoryLock>, Duration)>,
}

impl SessionEnforcer {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        ledger: Arc<dyn DeviceLedger>,
        audit: SecurityAuditLog,
        lockout: LockoutManager,
    ) -> Self {
        Self {
            sessions,
            ledger,
            audit,
            lockout,
            geo: None,
            advisory: None,
        }
    }

    /// Attach geolocation to LOGIN events
    pub fn with_geo(mut self, tracker: GeoTracker) -> Self {
        self.geo = Some(tracker);
        self
    }

    /// Serialize the terminate step per user across instances
    pub fn with_advisory_lock(mut self, lock: Arc<dyn AdvisoryLock>, ttl: Duration) -> Self {
        self.advisory = Some((lock, ttl));
        self
    }

    /// Keep only the session identified by `current_token` for `user_id`,
    /// then run the device velocity check.
    ///
    /// Origin is taken from `ctx`. Only an invalid call or a failed velocity
    /// check is returned as an error.
    pub async fn enforce(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        current_token: &str,
    ) -> GuardResult<EnforcementOutcome> {
        if user_id.is_nil() {
            return Err(GuardError::InvalidInput("user id is required".to_string()));
        }
        if current_token.trim().is_empty() {
            return Err(GuardError::InvalidInput("session token is required".to_string()));
        }

        let fp = fingerprint(&ctx.user_agent, &ctx.ip_address);

        let entry = DeviceLedgerEntry::new(user_id, &fp, &ctx.ip_address, &ctx.user_agent, ctx.now);
        let recorded = self.ledger.record(&entry).await;
        let recorded = BestEffort::log_and_continue("Device ledger write", ctx, recorded).is_done();

        self.record_login(ctx, user_id, &fp).await;

        let claim = self.claim(ctx, user_id).await;
        let terminated_count = self.terminate_others(ctx, user_id, current_token, &fp).await;
        if let Some(claim) = claim {
            self.release(ctx, claim).await;
        }

        let decision = self
            .lockout
            .evaluate(ctx, user_id, (!recorded).then_some(fp.as_str()))
            .await
            .map_err(GuardError::LockEvaluation)?;

        info!(
            request_id = %ctx.request_id,
            user_id = %user_id,
            terminated_count,
            devices_today = decision.devices_today(),
            "Single-session enforcement complete"
        );

        Ok(EnforcementOutcome {
            terminated_count,
            devices_today: decision.devices_today(),
            lock: decision.lock().cloned(),
        })
    }

    async fn record_login(&self, ctx: &RequestContext, user_id: Uuid, fp: &str) {
        let location = match &self.geo {
            Some(tracker) => tracker.lookup_for(user_id, &ctx.ip_address).await,
            None => None,
        };

        let event = SecurityEvent::new(
            ctx,
            user_id,
            "Signed in",
            SecurityEventDetails::Login {
                fingerprint: fp.to_string(),
                location,
            },
        );
        self.audit.append(ctx, event).await;
    }

    async fn terminate_others(
        &self,
        ctx: &RequestContext,
        user_id: Uuid,
        current_token: &str,
        fp: &str,
    ) -> u64 {
        let listed = self.sessions.list_active(user_id, ctx.now).await;
        let Some(active) = BestEffort::log_and_continue("Active session listing", ctx, listed).ok()
        else {
            return 0;
        };

        let others: Vec<Session> = active
            .into_iter()
            .filter(|session| !session.matches_token(current_token))
            .collect();
        if others.is_empty() {
            return 0;
        }

        let ids: Vec<Uuid> = others.iter().map(|session| session.id).collect();
        let deleted = self.sessions.delete_many(&ids).await;
        let Some(removed) = BestEffort::log_and_continue("Session termination", ctx, deleted).ok()
        else {
            return 0;
        };

        for session in &others {
            let event = SecurityEvent::new(
                ctx,
                user_id,
                "Session ended by a sign-in elsewhere",
                SecurityEventDetails::SessionTerminated {
                    session_id: session.id,
                    session_ip_address: session.ip_address.clone(),
                    session_user_agent: session.user_agent.clone(),
                    session_created_at: session.created_at,
                    replaced_by_fingerprint: Some(fp.to_string()),
                    replaced_by_ip_address: ctx.ip_address.clone(),
                },
            )
            .with_origin(&session.ip_address, &session.user_agent);
            self.audit.append(ctx, event).await;
        }

        removed
    }

    /// Try for the per-user claim a few times, then go on without it
    async fn claim(&self, ctx: &RequestContext, user_id: Uuid) -> Option<Claim> {
        let (lock, ttl) = self.advisory.as_ref()?;
        let claim = Claim {
            key: format!("{}{}", ADVISORY_KEY_PREFIX, user_id),
            owner: ctx.request_id.to_string(),
        };

        for attempt in 1..=ADVISORY_ATTEMPTS {
            match lock.try_acquire(&claim.key, &claim.owner, *ttl).await {
                Ok(true) => return Some(claim),
                Ok(false) => {
                    debug!(
                        request_id = %ctx.request_id,
                        attempt,
                        "Advisory claim {} is held, retrying", claim.key
                    );
                    tokio::time::sleep(ADVISORY_RETRY_DELAY).await;
                }
                Err(e) => {
                    warn!(
                        request_id = %ctx.request_id,
                        "Advisory lock unavailable, enforcing without it: {}", e
                    );
                    return None;
                }
            }
        }

        warn!(
            request_id = %ctx.request_id,
            user_id = %user_id,
            "Advisory claim not obtained, enforcing without it"
        );
        None
    }

    async fn release(&self, ctx: &RequestContext, claim: Claim) {
        let Some((lock, _)) = self.advisory.as_ref() else {
            return;
        };
        if let Err(e) = lock.release(&claim.key, &claim.owner).await {
            warn!(
                request_id = %ctx.request_id,
                "Failed to release advisory claim {}: {}", claim.key, e
            );
        }
    }
}
