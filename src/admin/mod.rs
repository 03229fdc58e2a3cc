//! Admin API over the dynamic IP lists and client standing.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/blocked", get(list_blocked).post(add_blocked))
        .route("/admin/blocked/{ip}", delete(remove_blocked))
        .route("/admin/allowed", get(list_allowed).post(add_allowed))
        .route("/admin/allowed/{ip}", delete(remove_allowed))
        .route("/admin/clients/{ip}", get(inspect_client))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
