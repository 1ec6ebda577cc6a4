//! Scheduled retention of the device ledger, the audit trail and expired
//! sessions

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use common::error::DatabaseResult;
use serde::Serialize;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::audit::{BestEffort, SecurityAuditLog};
use crate::context::RequestContext;
use crate::repositories::SessionStore;

pub const DEFAULT_DAYS_TO_KEEP: u32 = 90;

/// Rows removed by one retention run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub cutoff: DateTime<Utc>,
    pub events_removed: u64,
    pub ledger_entries_removed: u64,
    pub expired_sessions_removed: u64,
}

/// `now - days_to_keep`, saturating at the earliest representable instant
pub fn retention_cutoff(now: DateTime<Utc>, days_to_keep: u32) -> DateTime<Utc> {
    Duration::try_days(i64::from(days_to_keep))
        .and_then(|keep| now.checked_sub_signed(keep))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Clone)]
pub struct RetentionPurge {
    audit: SecurityAuditLog,
    sessions: Arc<dyn SessionStore>,
    default_days_to_keep: u32,
}

impl RetentionPurge {
    pub fn new(
        audit: SecurityAuditLog,
        sessions: Arc<dyn SessionStore>,
        default_days_to_keep: u32,
    ) -> Self {
        Self {
            audit,
            sessions,
            default_days_to_keep,
        }
    }

    /// Remove ledger and event rows older than `days_to_keep` days, plus
    /// sessions already past their expiry.
    ///
    /// A failed ledger or event sweep is returned; the expired-session
    /// sweep is housekeeping and only logged.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        days_to_keep: Option<u32>,
    ) -> DatabaseResult<RetentionReport> {
        let days_to_keep = days_to_keep.unwrap_or(self.default_days_to_keep);
        let cutoff = retention_cutoff(ctx.now, days_to_keep);

        let swept = self.audit.purge_older_than(cutoff).await?;

        let expired = self.sessions.delete_expired(ctx.now).await;
        let expired_sessions_removed =
            BestEffort::log_and_continue("Expired session sweep", ctx, expired)
                .ok()
                .unwrap_or(0);

        info!(
            request_id = %ctx.request_id,
            days_to_keep,
            expired_sessions_removed,
            "Retention purge finished"
        );

        Ok(RetentionReport {
            cutoff,
            events_removed: swept.events_removed,
            ledger_entries_removed: swept.ledger_entries_removed,
            expired_sessions_removed,
        })
    }

    /// Run the purge on `schedule` (cron with seconds) with the default
    /// retention. The returned scheduler must be kept alive.
    pub async fn start_schedule(&self, schedule: &str) -> Result<JobScheduler> {
        let purge = self.clone();

        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(schedule, move |_, _| {
            let purge = purge.clone();
            Box::pin(async move {
                info!("Retention purge job executed");
                if let Err(e) = purge.run(&RequestContext::system(), None).await {
                    error!("Retention purge failed: {}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!("Started retention scheduler with schedule: {}", schedule);
        Ok(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cutoff_is_days_before_now() {
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        assert_eq!(
            retention_cutoff(now, 90),
            Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(retention_cutoff(now, 0), now);
    }

    #[test]
    fn cutoff_saturates() {
        assert_eq!(
            retention_cutoff(DateTime::<Utc>::MIN_UTC, 1),
            DateTime::<Utc>::MIN_UTC
        );
    }
}
