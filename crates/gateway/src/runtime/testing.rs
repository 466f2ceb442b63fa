//! In-process fakes for runtime tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use tl_domain::capability::LlmCapabilities;
use tl_domain::error::{Error, Result};
use tl_domain::stream::{BoxStream, StreamEvent, Usage};
use tl_domain::tool::ToolDefinition;
use tl_providers::{ChatRequest, LlmProvider};
use tl_tools::{Tool, WorkflowNodeResult, WorkflowTool};

use super::store::KvStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A store that is always down.
pub struct FailingStore;

#[async_trait::async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(Error::Store("connection refused".into()))
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Err(Error::Store("connection refused".into()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What one `chat_stream` call does.
pub enum Turn {
    Events(Vec<Result<StreamEvent>>),
    /// The request itself fails.
    Fail(String),
    Panic,
    /// Never produces anything.
    Hang,
}

/// Replays one scripted [`Turn`] per call and records every request.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<ChatRequest>>,
    chunk_delay: Option<Duration>,
    capabilities: LlmCapabilities,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            chunk_delay: None,
            capabilities: LlmCapabilities { supports_tools: true },
        }
    }

    /// Sleep (on the tokio clock) before every chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn without_tools(mut self) -> Self {
        self.capabilities.supports_tools = false;
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().push(req.clone());
        let turn = self.turns.lock().pop_front();
        let events = match turn {
            Some(Turn::Events(events)) => events,
            Some(Turn::Fail(message)) => {
                return Err(Error::Provider { provider: "scripted".into(), message })
            }
            Some(Turn::Panic) => panic!("scripted provider panicked"),
            Some(Turn::Hang) => {
                return Ok(Box::pin(futures_util::stream::pending::<Result<StreamEvent>>()));
            }
            None => vec![Ok(done(None))],
        };
        let delay = self.chunk_delay;
        Ok(Box::pin(async_stream::stream! {
            for event in events {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield event;
            }
        }))
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }
}

// ── chunk helpers ───────────────────────────────────────────────────

pub fn token(text: &str) -> Result<StreamEvent> {
    Ok(StreamEvent::Token { text: text.into() })
}

pub fn thinking(text: &str) -> Result<StreamEvent> {
    Ok(StreamEvent::Thinking { text: text.into() })
}

/// A complete tool call as the adapters emit it: start, then finish.
pub fn tool_call(call_id: &str, tool_name: &str, arguments: Value) -> Vec<Result<StreamEvent>> {
    vec![
        Ok(StreamEvent::ToolCallStarted { call_id: call_id.into(), tool_name: tool_name.into() }),
        Ok(StreamEvent::ToolCallDelta { call_id: call_id.into(), delta: arguments.to_string() }),
        Ok(StreamEvent::ToolCallFinished {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }),
    ]
}

pub fn done(usage: Option<Usage>) -> StreamEvent {
    StreamEvent::Done { usage, finish_reason: Some("stop".into()) }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn definition(name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        description: format!("test tool {name}"),
        parameters: json!({"type": "object"}),
    }
}

/// Returns its arguments under `"echo"`.
pub struct EchoTool(pub &'static str);

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        definition(self.0)
    }

    async fn invoke(&self, args: Value) -> Result<Value> {
        Ok(json!({ "echo": args }))
    }
}

pub struct FailingTool;

#[async_trait::async_trait]
impl Tool for FailingTool {
    fn definition(&self) -> ToolDefinition {
        definition("flaky")
    }

    async fn invoke(&self, _args: Value) -> Result<Value> {
        Err(Error::Tool { tool: "flaky".into(), message: "upstream returned 503".into() })
    }
}

/// Never returns.
pub struct HangingTool;

#[async_trait::async_trait]
impl Tool for HangingTool {
    fn definition(&self) -> ToolDefinition {
        definition("hang")
    }

    async fn invoke(&self, _args: Value) -> Result<Value> {
        std::future::pending::<()>().await;
        Ok(Value::Null)
    }
}

/// A two-node workflow: `start` echoes the input, `end` returns a summary.
pub struct TwoNodeWorkflow;

#[async_trait::async_trait]
impl Tool for TwoNodeWorkflow {
    fn definition(&self) -> ToolDefinition {
        definition("summarize_flow")
    }

    async fn invoke(&self, _args: Value) -> Result<Value> {
        Ok(json!({ "summary": "done" }))
    }

    fn as_workflow(&self) -> Option<&dyn WorkflowTool> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl WorkflowTool for TwoNodeWorkflow {
    fn display_name(&self) -> &str {
        "Summarize"
    }

    async fn stream(&self, args: Value) -> Result<BoxStream<'static, Result<WorkflowNodeResult>>> {
        let nodes = vec![
            Ok(WorkflowNodeResult {
                node_id: "start".into(),
                node_type: "start".into(),
                title: "Start".into(),
                status: "succeeded".into(),
                inputs: args.clone(),
                outputs: args,
                ..Default::default()
            }),
            Ok(WorkflowNodeResult {
                node_id: "end".into(),
                node_type: "end".into(),
                title: "End".into(),
                status: "succeeded".into(),
                outputs: json!({ "summary": "done" }),
                latency: 0.2,
                ..Default::default()
            }),
        ];
        Ok(Box::pin(futures_util::stream::iter(nodes)))
    }
}

pub fn shared<T: Tool + 'static>(tool: T) -> Arc<dyn Tool> {
    Arc::new(tool)
}
