//! Health check endpoints.

use crate::AppState;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use serde_json::{Value, json};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ready(State(state): State<AppState>) -> Json<Value> {
    let queue = state.daemon.queue();
    Json(json!({
        "status": "ready",
        "projects": state.daemon.registry().projects().len(),
        "running_builds": queue.running_count(),
        "scheduled_builds": queue.queued_count(),
    }))
}
