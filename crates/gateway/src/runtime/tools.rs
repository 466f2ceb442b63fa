//! The tools stage: run every tool call the model asked for.
//!
//! Calls run one after another in request order so their events reach the
//! channel in that order. A failing or unknown tool never fails the stage;
//! its error text becomes the tool result and the model sees it next turn.

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use tl_domain::error::Result;
use tl_domain::thought::{AgentThought, QueueEvent};
use tl_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};
use tl_tools::{Toolset, WorkflowTool, DATASET_RETRIEVAL_TOOL_NAME};

use super::agent::AgentState;
use super::queue::EventQueueRegistry;

/// Tool calls carried by the last message, if it is an assistant turn.
pub fn pending_tool_calls(messages: &[Message]) -> Vec<ToolCall> {
    let Some(last) = messages.last().filter(|m| m.role == Role::Assistant) else {
        return Vec::new();
    };
    match &last.content {
        MessageContent::Text(_) => Vec::new(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, name, input } => Some(ToolCall {
                    call_id: id.clone(),
                    tool_name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect(),
    }
}

/// Run the pending calls, append one tool message per call and publish one
/// ACTION (or DATASET_RETRIEVAL) event per call.
pub(crate) async fn execute(tools: &Toolset, queue: &EventQueueRegistry, state: &mut AgentState) {
    let task_id = state.task_id;
    let calls = pending_tool_calls(&state.messages);
    tracing::debug!(%task_id, count = calls.len(), "running tool calls");

    for call in calls {
        let id = Uuid::new_v4();
        let started = Instant::now();
        let span = tracing::info_span!(
            "tool.call",
            "otel.kind" = "INTERNAL",
            tool = %call.tool_name,
            call_id = %call.call_id,
        );
        let result = invoke(tools, queue, task_id, &call).instrument(span).await;
        let observation = result.to_string();

        state.messages.push(Message::tool_result(call.call_id.clone(), observation.clone()));

        let kind = if call.tool_name == DATASET_RETRIEVAL_TOOL_NAME {
            QueueEvent::DatasetRetrieval
        } else {
            QueueEvent::Action
        };
        let mut thought = AgentThought::with_id(id, task_id, kind);
        thought.observation = observation;
        thought.tool = call.tool_name;
        thought.tool_input = call.arguments;
        thought.latency = started.elapsed().as_secs_f64();
        queue.publish(task_id, thought).await;
    }

    state.iteration_count += 1;
}

async fn invoke(tools: &Toolset, queue: &EventQueueRegistry, task_id: Uuid, call: &ToolCall) -> Value {
    let Some(tool) = tools.get(&call.tool_name) else {
        tracing::warn!(tool = %call.tool_name, "model asked for an unknown tool");
        return Value::String(format!("tool '{}' is not available", call.tool_name));
    };

    let outcome = match tool.as_workflow() {
        Some(workflow) => run_workflow(workflow, queue, task_id, call).await,
        None => tool.invoke(call.arguments.clone()).await,
    };

    match outcome {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(tool = %call.tool_name, error = %e, "tool failed");
            Value::String(format!("tool execution failed: {e}"))
        }
    }
}

/// Stream a workflow's nodes as WORKFLOW_NODE_MESSAGE events. The last
/// node's outputs are the tool result.
async fn run_workflow(
    workflow: &dyn WorkflowTool,
    queue: &EventQueueRegistry,
    task_id: Uuid,
    call: &ToolCall,
) -> Result<Value> {
    let mut nodes = workflow.stream(call.arguments.clone()).await?;
    let mut outputs = json!({});

    while let Some(node) = nodes.next().await {
        let node = node?;
        tracing::debug!(node_id = %node.node_id, status = %node.status, "workflow node finished");

        let mut thought = AgentThought::new(task_id, QueueEvent::WorkflowNodeMessage);
        thought.observation =
            json!({ "value": &node, "workflow_name": workflow.display_name() }).to_string();
        thought.tool = call.tool_name.clone();
        thought.tool_input = call.arguments.clone();
        thought.latency = node.latency;
        queue.publish(task_id, thought).await;

        outputs = node.outputs;
    }
    Ok(outputs)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tl_domain::config::StreamConfig;
    use tl_domain::thought::{InvokeFrom, TaskOwner};
    use tl_tools::Tool;

    use crate::runtime::listener::listen;
    use crate::runtime::store::MemoryKvStore;
    use crate::runtime::testing::{shared, EchoTool, FailingTool, TwoNodeWorkflow};

    fn queue() -> Arc<EventQueueRegistry> {
        Arc::new(EventQueueRegistry::new(
            Arc::new(MemoryKvStore::new()),
            TaskOwner::new(InvokeFrom::Debugger, "u1"),
            StreamConfig::default(),
        ))
    }

    fn state_with_calls(calls: &[ToolCall]) -> AgentState {
        let mut state = AgentState::new("q");
        state.messages.push(Message::assistant_tool_calls("", calls));
        state
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall { call_id: id.into(), tool_name: name.into(), arguments: args }
    }

    async fn published(queue: Arc<EventQueueRegistry>, task_id: Uuid) -> Vec<AgentThought> {
        queue.publish(task_id, AgentThought::new(task_id, QueueEvent::AgentEnd)).await;
        let mut events: Vec<_> = listen(queue, task_id, None).collect().await;
        events.pop();
        events
    }

    #[test]
    fn pending_calls_come_from_last_assistant_turn() {
        let calls = vec![call("c1", "echo", json!({"x": 1}))];
        let mut messages = vec![Message::user("q"), Message::assistant_tool_calls("", &calls)];
        assert_eq!(pending_tool_calls(&messages), calls);
        messages.push(Message::tool_result("c1", "{}"));
        assert!(pending_tool_calls(&messages).is_empty());
    }

    #[tokio::test]
    async fn results_become_tool_messages_and_actions() {
        let tools: Toolset = [shared(EchoTool("echo")), shared(FailingTool)].into_iter().collect();
        let queue = queue();
        let mut state = state_with_calls(&[
            call("c1", "echo", json!({"x": 1})),
            call("c2", "flaky", json!({})),
            call("c3", "missing", json!({})),
        ]);
        execute(&tools, &queue, &mut state).await;

        assert_eq!(state.iteration_count, 1);
        let results: Vec<_> = state.messages[2..].iter().map(|m| m.role).collect();
        assert_eq!(results, vec![Role::Tool; 3]);

        let events = published(Arc::clone(&queue), state.task_id).await;
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.event == QueueEvent::Action));
        assert_eq!(events[0].tool, "echo");
        assert_eq!(events[0].tool_input, json!({"x": 1}));
        assert_eq!(events[0].observation, json!({"echo": {"x": 1}}).to_string());
        assert!(events[1].observation.contains("tool execution failed: tool flaky: upstream returned 503"));
        assert!(events[2].observation.contains("tool 'missing' is not available"));
    }

    #[tokio::test]
    async fn dataset_retrieval_has_its_own_event() {
        let tools: Toolset = [shared(EchoTool(DATASET_RETRIEVAL_TOOL_NAME))].into_iter().collect();
        let queue = queue();
        let mut state = state_with_calls(&[call("c1", DATASET_RETRIEVAL_TOOL_NAME, json!({"query": "q"}))]);
        execute(&tools, &queue, &mut state).await;

        let events = published(Arc::clone(&queue), state.task_id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, QueueEvent::DatasetRetrieval);
    }

    #[tokio::test]
    async fn workflow_streams_nodes_then_acts() {
        let workflow: Arc<dyn Tool> = Arc::new(TwoNodeWorkflow);
        let tools: Toolset = [workflow].into_iter().collect();
        let queue = queue();
        let mut state = state_with_calls(&[call("c1", "summarize_flow", json!({"text": "long"}))]);
        execute(&tools, &queue, &mut state).await;

        let events = published(Arc::clone(&queue), state.task_id).await;
        let kinds: Vec<_> = events.iter().map(|e| e.event).collect();
        assert_eq!(
            kinds,
            vec![QueueEvent::WorkflowNodeMessage, QueueEvent::WorkflowNodeMessage, QueueEvent::Action]
        );

        let node: Value = serde_json::from_str(&events[1].observation).unwrap();
        assert_eq!(node["workflow_name"], "Summarize");
        assert_eq!(node["value"]["node_id"], "end");
        assert_eq!(events[2].observation, json!({"summary": "done"}).to_string());
        assert_eq!(state.messages.last().unwrap().role, Role::Tool);
    }
}
