//! Security audit event model
//!
//! Every event carries a typed payload whose shape is fixed by its event
//! type. On the wire and in storage the payload is split into an
//! `event_type` discriminator and a `metadata` object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::geo::GeoLocation;

/// Discriminator persisted in the `event_type` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    Login,
    Logout,
    SessionTerminated,
    DeviceLimitExceeded,
    SuspiciousActivity,
    EmailVerificationSent,
    EmailVerified,
    EmailChanged,
    PasswordChanged,
    AccountLocked,
    AccountUnlocked,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::Login => "LOGIN",
            SecurityEventType::Logout => "LOGOUT",
            SecurityEventType::SessionTerminated => "SESSION_TERMINATED",
            SecurityEventType::DeviceLimitExceeded => "DEVICE_LIMIT_EXCEEDED",
            SecurityEventType::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            SecurityEventType::EmailVerificationSent => "EMAIL_VERIFICATION_SENT",
            SecurityEventType::EmailVerified => "EMAIL_VERIFIED",
            SecurityEventType::EmailChanged => "EMAIL_CHANGED",
            SecurityEventType::PasswordChanged => "PASSWORD_CHANGED",
            SecurityEventType::AccountLocked => "ACCOUNT_LOCKED",
            SecurityEventType::AccountUnlocked => "ACCOUNT_UNLOCKED",
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed metadata, one documented shape per event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event_type",
    content = "metadata",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum SecurityEventDetails {
    Login {
        fingerprint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<GeoLocation>,
    },
    Logout {
        session_id: Uuid,
    },
    /// Origin fields describe the session that was logged out, while
    /// `replaced_by_*` describe the login that caused it.
    SessionTerminated {
        session_id: Uuid,
        session_ip_address: String,
        session_user_agent: String,
        session_created_at: DateTime<Utc>,
        replaced_by_fingerprint: Option<String>,
        replaced_by_ip_address: String,
    },
    DeviceLimitExceeded {
        devices_today: u32,
        max_devices: u32,
        lock_until: DateTime<Utc>,
        sessions_removed: u64,
    },
    SuspiciousActivity {
        detail: String,
    },
    EmailVerificationSent {
        email: String,
    },
    EmailVerified {
        email: String,
    },
    EmailChanged {
        new_email: String,
    },
    PasswordChanged {},
    AccountLocked {
        reason: String,
        lock_until: DateTime<Utc>,
        requested_hours: u32,
        actor: Option<Uuid>,
    },
    AccountUnlocked {
        previous_lock_until: Option<DateTime<Utc>>,
        previous_reason: Option<String>,
        actor: Option<Uuid>,
    },
}

impl SecurityEventDetails {
    pub fn event_type(&self) -> SecurityEventType {
        match self {
            SecurityEventDetails::Login { .. } => SecurityEventType::Login,
            SecurityEventDetails::Logout { .. } => SecurityEventType::Logout,
            SecurityEventDetails::SessionTerminated { .. } => SecurityEventType::SessionTerminated,
            SecurityEventDetails::DeviceLimitExceeded { .. } => {
                SecurityEventType::DeviceLimitExceeded
            }
            SecurityEventDetails::SuspiciousActivity { .. } => {
                SecurityEventType::SuspiciousActivity
            }
            SecurityEventDetails::EmailVerificationSent { .. } => {
                SecurityEventType::EmailVerificationSent
            }
            SecurityEventDetails::EmailVerified { .. } => SecurityEventType::EmailVerified,
            SecurityEventDetails::EmailChanged { .. } => SecurityEventType::EmailChanged,
            SecurityEventDetails::PasswordChanged {} => SecurityEventType::PasswordChanged,
            SecurityEventDetails::AccountLocked { .. } => SecurityEventType::AccountLocked,
            SecurityEventDetails::AccountUnlocked { .. } => SecurityEventType::AccountUnlocked,
        }
    }

    /// The `metadata` half of the persisted pair
    pub fn metadata(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut value| value.get_mut("metadata").map(Value::take))
            .unwrap_or_else(|| json!({}))
    }

    /// Rebuild the payload from its persisted `(event_type, metadata)` pair
    pub fn from_parts(event_type: &str, metadata: Value) -> serde_json::Result<Self> {
        serde_json::from_value(json!({
            "event_type": event_type,
            "metadata": metadata,
        }))
    }
}

/// Append-only audit record
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub description: String,
    pub ip_address: String,
    pub user_agent: String,
    #[serde(flatten)]
    pub details: SecurityEventDetails,
    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    /// Event stamped with the origin and server time of the current request
    pub fn new(
        ctx: &RequestContext,
        user_id: Uuid,
        description: impl Into<String>,
        details: SecurityEventDetails,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            description: description.into(),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            details,
            created_at: ctx.now,
        }
    }

    /// Replace the recorded origin, e.g. with that of a terminated session
    pub fn with_origin(
        mut self,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        self.ip_address = ip_address.into();
        self.user_agent = user_agent.into();
        self
    }

    pub fn event_type(&self) -> SecurityEventType {
        self.details.event_type()
    }
}
