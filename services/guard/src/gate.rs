//! Read-only lock status polled by clients and protected routes

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::lockout::{LockoutManager, start_of_utc_day};
use crate::models::LockInfo;
use crate::repositories::DeviceLedger;

/// Security status of the calling account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityStatus {
    pub locked: bool,
    pub lock_until: Option<DateTime<Utc>>,
    pub lock_reason: Option<String>,
    pub devices_used_today: u32,
    pub max_devices_allowed: u32,
    /// Part of the status could not be read; the rest is a neutral default
    pub degraded: bool,
}

/// Outcome of a protected-route check
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allowed,
    Locked(LockInfo),
}

/// Security gate
#[derive(Clone)]
pub struct SecurityGate {
    lockout: LockoutManager,
    ledger: Arc<dyn DeviceLedger>,
}

impl SecurityGate {
    pub fn new(lockout: LockoutManager, ledger: Arc<dyn DeviceLedger>) -> Self {
        Self { lockout, ledger }
    }

    /// Never fails: unreadable parts come back unlocked and flagged degraded
    pub async fn status(&self, ctx: &RequestContext, user_id: Uuid) -> SecurityStatus {
        let mut degraded = false;

        let lock = match self.lockout.current_lock(ctx, user_id).await {
            Ok(lock) => lock,
            Err(e) => {
                warn!(
                    request_id = %ctx.request_id,
                    user_id = %user_id,
                    "Lock state unreadable, reporting unlocked: {}", e
                );
                degraded = true;
                None
            }
        };

        let since = start_of_utc_day(ctx.now);
        let devices_used_today = match self.ledger.count_distinct_devices(user_id, since).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    request_id = %ctx.request_id,
                    user_id = %user_id,
                    "Device count unreadable: {}", e
                );
                degraded = true;
                0
            }
        };

        SecurityStatus {
            locked: lock.is_some(),
            lock_until: lock.as_ref().map(|lock| lock.until),
            lock_reason: lock.map(|lock| lock.reason),
            devices_used_today,
            max_devices_allowed: self.lockout.policy().max_devices_per_day,
            degraded,
        }
    }

    /// Locked or not, failing open when the lock state cannot be read
    pub async fn check(&self, ctx: &RequestContext, user_id: Uuid) -> GateDecision {
        match self.lockout.current_lock(ctx, user_id).await {
            Ok(Some(lock)) => GateDecision::Locked(lock),
            Ok(None) => GateDecision::Allowed,
            Err(e) => {
                warn!(
                    request_id = %ctx.request_id,
                    user_id = %user_id,
                    "Gate check degraded, allowing request: {}", e
                );
                GateDecision::Allowed
            }
        }
    }
}
