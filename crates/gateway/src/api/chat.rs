//! Chat API endpoints, the primary interface for running agent tasks.
//!
//! - `POST /v1/chat`        non-streaming: returns the folded `AgentResult`
//! - `POST /v1/chat/stream` SSE: one event per `AgentThought`, named after its kind

use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::StreamExt;
use serde::Deserialize;

use tl_domain::thought::{InvokeFrom, TaskOwner};
use tl_domain::tool::Message;

use crate::runtime::{AgentState, FunctionCallAgent};
use crate::state::AppState;

/// Header carrying the task id on `/v1/chat` responses, so a caller can
/// stop a blocking chat from another connection.
pub const TASK_ID_HEADER: &str = "x-task-id";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One earlier exchange of the conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryRound {
    pub query: String,
    pub answer: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// User message text.
    pub query: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Earlier rounds, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryRound>,
    /// Recalled long-term memory; only used when the agent enables it.
    #[serde(default)]
    pub long_term_memory: Option<String>,
    pub user_id: String,
    #[serde(default)]
    pub invoke_from: InvokeFrom,
}

impl ChatRequest {
    fn into_state(self) -> AgentState {
        let history = self
            .history
            .into_iter()
            .flat_map(|round| [Message::user(round.query), Message::assistant(round.answer)])
            .collect();
        let state = AgentState::with_images(self.query, &self.image_urls).with_history(history);
        match self.long_term_memory {
            Some(memory) => state.with_long_term_memory(memory),
            None => state,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat (non-streaming)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Response {
    let (agent, task) = match prepare(&state, body) {
        Ok(prepared) => prepared,
        Err(resp) => return resp,
    };
    let task_id = task.task_id.to_string();
    let result = agent.invoke(task).await;
    tracing::info!(
        task_id = %task_id,
        status = ?result.status,
        latency = result.latency,
        "chat finished"
    );
    ([(TASK_ID_HEADER, task_id)], Json(result)).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Response {
    let (agent, task) = match prepare(&state, body) {
        Ok(prepared) => prepared,
        Err(resp) => return resp,
    };

    // Dropping the response body (client disconnect) drops the listener,
    // which aborts the worker and releases the channel.
    let events = agent.stream(task).map(|thought| {
        let data = serde_json::to_string(&thought).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().event(thought.event.as_str()).data(data))
    });

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task setup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the agent and initial state for one chat, or the error response.
fn prepare(state: &AppState, body: ChatRequest) -> Result<(FunctionCallAgent, AgentState), Response> {
    if body.query.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "query must not be empty"));
    }
    if body.user_id.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "user_id must not be empty"));
    }

    let owner = TaskOwner::new(body.invoke_from, body.user_id.clone());
    let Some(agent) = state.agent_for(owner) else {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "no LLM providers are available; configure one under [[llm.providers]]",
        ));
    };

    Ok((agent, body.into_state()))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
