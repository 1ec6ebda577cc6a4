//! Request guards: bearer authentication, admin role, lock gate and the
//! internal shared key

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use crate::context::RequestContext;
use crate::error::{GuardError, locked_body};
use crate::gate::GateDecision;
use crate::jwt::{AuthUser, bearer_token};
use crate::state::AppState;

pub const INTERNAL_KEY_HEADER: &str = "x-internal-key";

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, GuardError> {
    let token = bearer_token(req.headers()).ok_or(GuardError::Unauthorized)?;
    let user = state.jwt_verifier.verify(token)?;

    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

/// Admin role check; must run after [`auth_middleware`]
pub async fn require_admin(req: Request, next: Next) -> Result<Response, GuardError> {
    let user = req
        .extensions()
        .get::<AuthUser>()
        .ok_or(GuardError::Unauthorized)?;

    if !user.is_admin() {
        warn!(user_id = %user.id, "Admin route refused for non-admin user");
        return Err(GuardError::Forbidden);
    }

    Ok(next.run(req).await)
}

/// Answer 423 for locked accounts; must run after [`auth_middleware`]
pub async fn require_unlocked(
    State(state): State<AppState>,
    ctx: RequestContext,
    req: Request,
    next: Next,
) -> Result<Response, GuardError> {
    let user_id = req
        .extensions()
        .get::<AuthUser>()
        .map(|user| user.id)
        .ok_or(GuardError::Unauthorized)?;

    match state.service.check_access(&ctx, user_id).await {
        GateDecision::Allowed => Ok(next.run(req).await),
        GateDecision::Locked(lock) => {
            Ok((StatusCode::LOCKED, Json(locked_body(&lock, ctx.now))).into_response())
        }
    }
}

/// Shared-key check for calls from the identity provider
pub async fn internal_key_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, GuardError> {
    let Some(expected) = state.internal_api_key.as_deref() else {
        error!("Internal route called but GUARD_INTERNAL_API_KEY is not configured");
        return Err(GuardError::Unauthorized);
    };

    let presented = req
        .headers()
        .get(INTERNAL_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(GuardError::Unauthorized)?;

    if !keys_match(presented, expected) {
        warn!("Internal route called with a wrong key");
        return Err(GuardError::Unauthorized);
    }

    Ok(next.run(req).await)
}

/// Comparison whose running time does not depend on where the keys differ
fn keys_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
