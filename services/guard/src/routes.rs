//! Session guard routes

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    context::RequestContext,
    error::{GuardError, GuardResult, locked_body},
    gate::GateDecision,
    jwt::{AuthUser, bearer_token},
    middleware::{auth_middleware, internal_key_middleware, require_admin, require_unlocked},
    models::NewSession,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LockRequest {
    pub reason: String,
    /// Falls back to the automatic lock duration
    pub hours: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PurgeRequest {
    pub days_to_keep: Option<u32>,
}

/// Session handed over by the identity provider, with the end user's
/// origin as the provider saw it
#[derive(Debug, Deserialize)]
pub struct RegisterSessionRequest {
    #[serde(flatten)]
    pub session: NewSession,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RegisterSessionRequest {
    /// Context for the login, falling back to the provider's own request
    /// origin for anything it did not send
    pub fn into_login(self, ctx: RequestContext) -> (RequestContext, NewSession) {
        let ctx = ctx.with_client_origin(self.ip_address.as_deref(), self.user_agent.as_deref());
        (ctx, self.session)
    }
}

/// Create the router for the guard service
pub fn create_router(state: AppState) -> Router {
    let internal_routes = Router::new()
        .route("/internal/sessions", post(register_session))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            internal_key_middleware,
        ));

    let unlocked_routes = Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", delete(terminate_session))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_unlocked));

    let user_routes = Router::new()
        .route("/security/status", get(security_status))
        .route("/security/check", get(security_check))
        .route("/security/devices", get(device_history))
        .route("/security/events", get(security_events))
        .route("/sessions/logout", post(logout))
        .merge(unlocked_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/admin/users/:id/lock", post(lock_account))
        .route("/admin/users/:id/unlock", post(unlock_account))
        .route("/admin/purge", post(purge))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .merge(internal_routes)
        .merge(user_routes)
        .merge(admin_routes)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = common::database::health_check(&state.db_pool)
        .await
        .unwrap_or(false);
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if database { "ok" } else { "degraded" },
            "service": "session-guard",
            "database": database,
        })),
    )
}

/// Accept a freshly authenticated session from the identity provider
pub async fn register_session(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(payload): Json<RegisterSessionRequest>,
) -> GuardResult<impl IntoResponse> {
    let (ctx, new_session) = payload.into_login(ctx);
    let outcome = state.service.register_login(&ctx, new_session).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "session": outcome.session,
            "terminated_count": outcome.enforcement.terminated_count,
            "devices_today": outcome.enforcement.devices_today,
        })),
    ))
}

pub async fn security_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    Extension(user): Extension<AuthUser>,
) -> impl IntoResponse {
    Json(state.service.security_status(&ctx, user.id).await)
}

/// 200 while the account may be used, 423 once it is locked
pub async fn security_check(
    State(state): State<AppState>,
    ctx: RequestContext,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match state.service.check_access(&ctx, user.id).await {
        GateDecision::Allowed => Json(json!({ "status": "ok" })).into_response(),
        GateDecision::Locked(lock) => {
            (StatusCode::LOCKED, Json(locked_body(&lock, ctx.now))).into_response()
        }
    }
}

pub async fn list_sessions(
    State(state): State<AppState>,
    ctx: RequestContext,
    Extension(user): Extension<AuthUser>,
) -> GuardResult<impl IntoResponse> {
    let sessions = state.service.session_list(&ctx, user.id).await?;
    Ok(Json(sessions))
}

pub async fn terminate_session(
    State(state): State<AppState>,
    ctx: RequestContext,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> GuardResult<StatusCode> {
    state.service.terminate_session(&ctx, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn logout(
    State(state): State<AppState>,
    ctx: RequestContext,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
) -> GuardResult<StatusCode> {
    let token = bearer_token(&headers).ok_or(GuardError::Unauthorized)?;
    state.service.logout(&ctx, user.id, token).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn device_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<LimitQuery>,
) -> GuardResult<impl IntoResponse> {
    let entries = state.service.device_history(user.id, query.limit).await?;
    Ok(Json(entries))
}

pub async fn security_events(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<LimitQuery>,
) -> GuardResult<impl IntoResponse> {
    let events = state.service.security_events(user.id, query.limit).await?;
    Ok(Json(events))
}

pub async fn lock_account(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<LockRequest>,
) -> GuardResult<impl IntoResponse> {
    let hours = payload
        .hours
        .unwrap_or(state.service.policy().lock_duration_hours);
    let lock = state
        .service
        .lock_account(&ctx, user_id, &payload.reason, hours)
        .await?;

    Ok(Json(json!({
        "user_id": user_id,
        "lock_until": lock.until,
        "lock_reason": lock.reason,
    })))
}

pub async fn unlock_account(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(user_id): Path<Uuid>,
) -> GuardResult<StatusCode> {
    state.service.unlock_account(&ctx, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn purge(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Option<Json<PurgeRequest>>,
) -> GuardResult<impl IntoResponse> {
    let Json(request) = payload.unwrap_or_default();
    let report = state.service.purge(&ctx, request.days_to_keep).await?;
    Ok(Json(report))
}
