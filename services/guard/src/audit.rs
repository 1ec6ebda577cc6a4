//! Security audit trail
//!
//! Writes to the trail are best effort: a failed append is logged and handed
//! back as a [`BestEffort`] value so the caller's primary flow goes on.
//! Retention is the one place where the event trail and the device ledger
//! are swept together under a single cutoff.

use chrono::{DateTime, Utc};
use common::error::DatabaseResult;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::models::SecurityEvent;
use crate::repositories::{DeviceLedger, SecurityEventStore};

/// Outcome of a side write that must never fail the operation around it
#[derive(Debug)]
pub enum BestEffort<T> {
    Done(T),
    /// The write failed and was logged; carries the error text
    Skipped(String),
}

impl<T> BestEffort<T> {
    /// Log a failed result under `operation` and keep going
    pub fn log_and_continue(
        operation: &str,
        ctx: &RequestContext,
        result: DatabaseResult<T>,
    ) -> Self {
        match result {
            Ok(value) => BestEffort::Done(value),
            Err(e) => {
                error!(
                    request_id = %ctx.request_id,
                    "{} failed, continuing: {}", operation, e
                );
                BestEffort::Skipped(e.to_string())
            }
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, BestEffort::Done(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            BestEffort::Done(value) => Some(value),
            BestEffort::Skipped(_) => None,
        }
    }
}

/// Rows removed by one retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub events_removed: u64,
    pub ledger_entries_removed: u64,
}

/// Security audit log over the event store and the device ledger
#[derive(Clone)]
pub struct SecurityAuditLog {
    events: Arc<dyn SecurityEventStore>,
    ledger: Arc<dyn DeviceLedger>,
}

impl SecurityAuditLog {
    pub fn new(events: Arc<dyn SecurityEventStore>, ledger: Arc<dyn DeviceLedger>) -> Self {
        Self { events, ledger }
    }

    /// Append an event; failures are logged, never returned
    pub async fn append(&self, ctx: &RequestContext, event: SecurityEvent) -> BestEffort<()> {
        let result = self.events.append(&event).await;
        BestEffort::log_and_continue(
            &format!("Audit append of {} for user {}", event.event_type(), event.user_id),
            ctx,
            result,
        )
    }

    /// Events of `user_id`, newest first
    pub async fn query(&self, user_id: Uuid, limit: u32) -> DatabaseResult<Vec<SecurityEvent>> {
        self.events.query(user_id, limit).await
    }

    /// Delete event and ledger rows created before `cutoff`.
    ///
    /// Both tables are swept even if the first sweep fails; the first error
    /// is reported once both have been attempted.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DatabaseResult<PurgeReport> {
        info!("Purging audit and ledger rows older than {}", cutoff);

        let events = self.events.purge_older_than(cutoff).await;
        let ledger = self.ledger.purge_older_than(cutoff).await;

        let report = PurgeReport {
            events_removed: log_sweep_failure(events, "security_events")?,
            ledger_entries_removed: log_sweep_failure(ledger, "device_ledger")?,
        };

        info!(
            "Purged {} security events and {} ledger entries",
            report.events_removed, report.ledger_entries_removed
        );
        Ok(report)
    }
}

fn log_sweep_failure(result: DatabaseResult<u64>, table: &str) -> DatabaseResult<u64> {
    result.map_err(|e| {
        error!("Retention sweep of {} failed: {}", table, e);
        e
    })
}
