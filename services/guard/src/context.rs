//! Request-scoped context threaded explicitly through every component call

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use axum_extra::{TypedHeader, headers::UserAgent};
use chrono::{DateTime, Utc};
use std::convert::Infallible;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::jwt::AuthUser;

/// Placeholder for origin fields the client did not send
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Who is calling, from where, and at what server time.
///
/// `now` is captured once when the request starts; every time comparison
/// made on behalf of the request uses it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
    pub now: DateTime<Utc>,
    /// Authenticated caller when it differs from the subject, e.g. an admin
    pub actor: Option<Uuid>,
}

impl RequestContext {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            now: Utc::now(),
            actor: None,
        }
    }

    /// Context for work not driven by a client, such as the retention job
    pub fn system() -> Self {
        Self::new(UNKNOWN_ORIGIN, "system")
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn with_actor(mut self, actor: Uuid) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Take the end user's origin as resolved by an upstream caller.
    ///
    /// Missing or blank values keep what was read from the request itself.
    pub fn with_client_origin(
        mut self,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Self {
        if let Some(ip) = ip_address.map(str::trim).filter(|ip| !ip.is_empty()) {
            self.ip_address = ip.to_string();
        }
        if let Some(agent) = user_agent.map(str::trim).filter(|agent| !agent.is_empty()) {
            self.user_agent = agent.to_string();
        }
        self
    }
}

/// Best-guess client IP: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_ORIGIN.to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let ip_address = client_ip(&parts.headers, peer);

        let user_agent = TypedHeader::<UserAgent>::from_request_parts(parts, state)
            .await
            .map(|TypedHeader(agent)| agent.as_str().to_string())
            .unwrap_or_else(|_| UNKNOWN_ORIGIN.to_string());

        let mut ctx = RequestContext::new(ip_address, user_agent);
        ctx.actor = parts.extensions.get::<AuthUser>().map(|user| user.id);
        Ok(ctx)
    }
}
