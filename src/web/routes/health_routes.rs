use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use chrono::Utc;
use serde_json::{Value, json};

use crate::web::{AppError, AppState};

/// Liveness probe: database reachability plus queue depth per queue.
async fn health_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    state
        .db
        .ping()
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;

    let queues = state.scheduler.stats().await?;

    Ok(Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "database": "connected",
        "queues": queues,
    })))
}

pub fn health_router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_handler))
}
