//! Session integrity and device velocity lockout engine
//!
//! Keeps at most one live session per account and locks accounts that sign
//! in from too many distinct devices in one UTC day.
//!
//! # Example
//!
//! ```no_run
//! use guard::context::RequestContext;
//! use guard::models::NewSession;
//! use guard::repositories::Stores;
//! use guard::service::SecurityService;
//!
//! # async fn example(user_id: uuid::Uuid) -> guard::error::GuardResult<()> {
//! let service = SecurityService::builder(Stores::in_memory()).build();
//!
//! let ctx = RequestContext::new("203.0.113.7", "Mozilla/5.0");
//! let login = service
//!     .register_login(
//!         &ctx,
//!         NewSession {
//!             user_id,
//!             token: "token-from-identity-provider".to_string(),
//!             expires_at: ctx.now + chrono::Duration::hours(8),
//!         },
//!     )
//!     .await?;
//! println!("{} other sessions ended", login.enforcement.terminated_count);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod context;
pub mod enforcer;
pub mod error;
pub mod fingerprint;
pub mod gate;
pub mod geo;
pub mod jwt;
pub mod lockout;
pub mod middleware;
pub mod models;
pub mod purge;
pub mod repositories;
pub mod routes;
pub mod schema;
pub mod service;
pub mod state;
pub mod throttle;
