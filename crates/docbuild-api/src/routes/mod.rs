//! HTTP routes.

pub mod health;

use crate::AppState;
use crate::ws::ws_handler;
use axum::Router;
use axum::routing::get;

/// Build the server router: the protocol socket at `/` plus health checks.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .merge(health::router())
        .with_state(state)
}
