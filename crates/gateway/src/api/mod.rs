pub mod chat;
pub mod tasks;

use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

/// Build the full API router.
///
/// There is no authentication layer: the requester identity for chats and
/// stop requests is read from the request body.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/chat", post(chat::chat))
        .route("/v1/chat/stream", post(chat::chat_stream))
        .route("/v1/tasks/:task_id/stop", post(tasks::stop_task))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
