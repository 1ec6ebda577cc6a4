//! Session model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

use crate::context::RequestContext;

/// Authenticated session as persisted by the session store.
///
/// The bearer token itself is never stored, only its SHA-256 digest.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// New session creation payload, handed over by the identity provider
#[derive(Debug, Clone, Deserialize)]
pub struct NewSession {
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Build the row for a freshly issued token, stamped with the request origin
    pub fn issue(new_session: &NewSession, ctx: &RequestContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: new_session.user_id,
            token_hash: hash_token(&new_session.token),
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            created_at: ctx.now,
            expires_at: new_session.expires_at,
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Token identity check used to exclude the caller's own session
    pub fn matches_token(&self, token: &str) -> bool {
        self.token_hash == hash_token(token)
    }
}

/// SHA-256 hex digest of a session token
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn issued_session_keeps_only_the_token_digest() {
        let ctx = RequestContext::new("203.0.113.7", "Mozilla/5.0");
        let new_session = NewSession {
            user_id: Uuid::new_v4(),
            token: "secret-token".to_string(),
            expires_at: ctx.now + Duration::hours(1),
        };

        let session = Session::issue(&new_session, &ctx);

        assert_ne!(session.token_hash, "secret-token");
        assert_eq!(session.token_hash.len(), 64);
        assert!(session.matches_token("secret-token"));
        assert!(!session.matches_token("other-token"));
        assert_eq!(session.ip_address, "203.0.113.7");
    }

    #[test]
    fn session_activity_is_strictly_before_expiry() {
        let ctx = RequestContext::new("203.0.113.7", "Mozilla/5.0");
        let new_session = NewSession {
            user_id: Uuid::new_v4(),
            token: "t".to_string(),
            expires_at: ctx.now,
        };
        let session = Session::issue(&new_session, &ctx);

        assert!(!session.is_active_at(ctx.now));
        assert!(session.is_active_at(ctx.now - Duration::seconds(1)));
    }

    #[test]
    fn serialized_session_omits_token_hash() {
        let ctx = RequestContext::new("198.51.100.1", "curl/8.0");
        let new_session = NewSession {
            user_id: Uuid::new_v4(),
            token: "t".to_string(),
            expires_at: ctx.now + Duration::hours(1),
        };
        let json = serde_json::to_value(Session::issue(&new_session, &ctx)).unwrap();

        assert!(json.get("token_hash").is_none());
        assert_eq!(json["user_agent"], "curl/8.0");
    }
}
