//! CallGuard license server.
//!
//! Operators issue and manage licenses through bearer-authenticated
//! endpoints; validators embedded in customer installations activate and
//! report usage with nothing but their license key and hardware fingerprint.

pub mod api;
mod auth;
mod error;
mod handlers;
mod service;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use callguard_store::LicenseStore;
use std::sync::Arc;

pub use auth::AdminToken;
pub use error::{AppError, AppResult};
pub use service::{LicenseService, MAX_VALIDITY_DAYS};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LicenseService>,
    pub admin_token: AdminToken,
}

impl AppState {
    pub fn new(store: LicenseStore, admin_token: AdminToken) -> Self {
        Self {
            service: Arc::new(LicenseService::new(store)),
            admin_token,
        }
    }
}

/// Build the HTTP API router with the given state.
pub fn build_router(state: AppState) -> Router {
    let operator = Router::new()
        .route("/api/license/generate", post(handlers::generate))
        .route("/api/license/list", get(handlers::list))
        .route("/api/license/stats/summary", get(handlers::stats))
        .route("/api/license/{key}/info", get(handlers::info))
        .route("/api/license/{key}/extend", put(handlers::extend))
        .route("/api/license/{key}/deactivate", put(handlers::deactivate))
        .route("/api/license/{key}/reactivate", put(handlers::reactivate))
        .route("/api/license/{key}/reset-hardware", put(handlers::reset_hardware))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_admin));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/license/{key}/activate", post(handlers::activate))
        .route("/api/license/{key}/heartbeat", post(handlers::heartbeat))
        .merge(operator)
        .with_state(state)
}
