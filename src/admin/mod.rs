//! Admin API: read-only gateway introspection behind a bearer key.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Extension, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/sessions", get(get_sessions))
        .route("/admin/destinations", get(get_destinations))
        .layer(middleware::from_fn(admin_auth_middleware))
        .layer(Extension(state.clone()))
        .with_state(state)
}
