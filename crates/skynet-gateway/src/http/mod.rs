pub mod health;
pub mod webhooks;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// Any path that doesn't match a known route (e.g. the short/malformed
/// `/x` surfaces in `spec.md` §4.7) falls through here rather than axum's
/// bare 404, so a stray request gets a structured `400` instead of
/// whatever a misrouted handler might have panicked on.
pub async fn fallback_handler() -> impl IntoResponse {
    (StatusCode::BAD_REQUEST, Json(json!({"error": "no such route"})))
}
