//! Task control.
//!
//! - `POST /v1/tasks/:task_id/stop` asks a running task to stop

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use tl_domain::thought::{InvokeFrom, TaskOwner};

use crate::runtime::EventQueueRegistry;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub user_id: String,
    #[serde(default)]
    pub invoke_from: InvokeFrom,
}

/// Fire and forget: a requester that does not own the task, or a task that
/// already finished, gets the same answer and nothing happens.
pub async fn stop_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(body): Json<StopRequest>,
) -> Json<serde_json::Value> {
    let requester = TaskOwner::new(body.invoke_from, body.user_id);
    tracing::info!(%task_id, requester = %requester.cache_value(), "stop requested");
    EventQueueRegistry::request_stop(state.store.as_ref(), task_id, &requester, &state.config.runtime)
        .await;
    Json(serde_json::json!({ "ok": true }))
}
