//! Application state shared across handlers

use sqlx::PgPool;
use std::sync::Arc;

use crate::jwt::JwtVerifier;
use crate::service::SecurityService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub service: SecurityService,
    pub jwt_verifier: JwtVerifier,
    /// Expected `x-internal-key`; `/internal` routes refuse everything when unset
    pub internal_api_key: Option<Arc<str>>,
}
