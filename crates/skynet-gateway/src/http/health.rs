use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — liveness probe. Deliberately minimal and dependency-free;
/// richer status (`providers`, per-channel health) is exposed through the
/// JSON-RPC `health`/`channels.list` methods instead, which a caller that
/// already has a WS connection open can poll without a second transport.
pub async fn health_handler(State(_state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}
