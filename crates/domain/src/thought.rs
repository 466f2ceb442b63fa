//! Published agent activity.
//!
//! An [`AgentThought`] is one step of a running task as it crosses the
//! per-task channel. Streaming steps (answer text and reasoning) are
//! published many times under the same `id`; the aggregator folds them
//! back into one record per step.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::Message;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEvent {
    LongTermMemoryRecall,
    /// The model asked for one or more tool calls.
    #[serde(rename = "agent_thought")]
    Thought,
    /// Answer text.
    #[serde(rename = "agent_message")]
    Message,
    /// Reasoning text from the model's thinking channel.
    #[serde(rename = "agent_think")]
    Think,
    /// A tool ran.
    #[serde(rename = "agent_action")]
    Action,
    DatasetRetrieval,
    WorkflowNodeMessage,
    AgentEnd,
    Ping,
    Stop,
    Timeout,
    Error,
}

impl QueueEvent {
    /// Kinds that close the channel. Publishing one also pushes the
    /// end-of-stream sentinel.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueueEvent::Stop | QueueEvent::Error | QueueEvent::Timeout | QueueEvent::AgentEnd
        )
    }

    /// Kinds that stream under one id and accumulate `thought`/`answer`.
    pub fn is_accumulating(self) -> bool {
        matches!(self, QueueEvent::Message | QueueEvent::Think)
    }

    /// Wire name, also used as the SSE event name.
    pub fn as_str(self) -> &'static str {
        match self {
            QueueEvent::LongTermMemoryRecall => "long_term_memory_recall",
            QueueEvent::Thought => "agent_thought",
            QueueEvent::Message => "agent_message",
            QueueEvent::Think => "agent_think",
            QueueEvent::Action => "agent_action",
            QueueEvent::DatasetRetrieval => "dataset_retrieval",
            QueueEvent::WorkflowNodeMessage => "workflow_node_message",
            QueueEvent::AgentEnd => "agent_end",
            QueueEvent::Ping => "ping",
            QueueEvent::Stop => "stop",
            QueueEvent::Timeout => "timeout",
            QueueEvent::Error => "error",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentThought
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentThought {
    pub id: Uuid,
    pub task_id: Uuid,
    pub event: QueueEvent,

    #[serde(default)]
    pub thought: String,
    #[serde(default)]
    pub observation: String,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,

    /// History sent to the model for this step.
    #[serde(default)]
    pub message: Vec<Message>,
    #[serde(default)]
    pub message_token_count: u32,
    #[serde(default)]
    pub message_unit_price: f64,
    #[serde(default)]
    pub message_price_unit: f64,

    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub answer_token_count: u32,
    #[serde(default)]
    pub answer_unit_price: f64,
    #[serde(default)]
    pub answer_price_unit: f64,

    #[serde(default)]
    pub total_token_count: u32,
    #[serde(default)]
    pub total_price: f64,
    /// Seconds spent on this step.
    #[serde(default)]
    pub latency: f64,
}

impl AgentThought {
    /// A fresh step with a new id and empty payload.
    pub fn new(task_id: Uuid, event: QueueEvent) -> Self {
        Self::with_id(Uuid::new_v4(), task_id, event)
    }

    /// A step continuing (or replacing) the step `id`.
    pub fn with_id(id: Uuid, task_id: Uuid, event: QueueEvent) -> Self {
        Self {
            id,
            task_id,
            event,
            thought: String::new(),
            observation: String::new(),
            tool: String::new(),
            tool_input: serde_json::Value::Null,
            message: Vec::new(),
            message_token_count: 0,
            message_unit_price: 0.0,
            message_price_unit: 0.0,
            answer: String::new(),
            answer_token_count: 0,
            answer_unit_price: 0.0,
            answer_price_unit: 0.0,
            total_token_count: 0,
            total_price: 0.0,
            latency: 0.0,
        }
    }

    /// Fold a later fragment of the same step into this one: `thought` and
    /// `answer` concatenate, every other field takes the later value.
    pub fn absorb(&mut self, later: AgentThought) {
        let mut thought = std::mem::take(&mut self.thought);
        let mut answer = std::mem::take(&mut self.answer);
        thought.push_str(&later.thought);
        answer.push_str(&later.answer);
        *self = AgentThought { thought, answer, ..later };
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Folded result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Normal,
    Stop,
    Timeout,
    Error,
}

impl AgentStatus {
    /// The status a terminal event kind implies, if any. `AgentEnd` is a
    /// natural finish and leaves the status alone.
    pub fn from_event(event: QueueEvent) -> Option<Self> {
        match event {
            QueueEvent::Stop => Some(AgentStatus::Stop),
            QueueEvent::Timeout => Some(AgentStatus::Timeout),
            QueueEvent::Error => Some(AgentStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentResult {
    pub query: String,
    pub image_urls: Vec<String>,
    pub message: Vec<Message>,
    pub answer: String,
    pub agent_thoughts: Vec<AgentThought>,
    pub latency: f64,
    pub status: AgentStatus,
    pub error: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task ownership
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Front end a turn was started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeFrom {
    WebApp,
    #[default]
    Debugger,
    AssistantAgent,
    ServiceApi,
    EndUser,
}

impl InvokeFrom {
    /// Account-backed front ends; everything else is an end user.
    fn is_account(self) -> bool {
        matches!(
            self,
            InvokeFrom::WebApp | InvokeFrom::Debugger | InvokeFrom::AssistantAgent
        )
    }
}

/// Who started (or is asking to stop) a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOwner {
    pub invoke_from: InvokeFrom,
    pub user_id: String,
}

impl TaskOwner {
    pub fn new(invoke_from: InvokeFrom, user_id: impl Into<String>) -> Self {
        Self { invoke_from, user_id: user_id.into() }
    }

    /// Value stored in the belongs-to marker and compared on stop requests.
    pub fn cache_value(&self) -> String {
        let prefix = if self.invoke_from.is_account() { "account" } else { "end-user" };
        format!("{prefix}-{}", self.user_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_kinds() {
        for kind in [QueueEvent::Stop, QueueEvent::Error, QueueEvent::Timeout, QueueEvent::AgentEnd] {
            assert!(kind.is_terminal(), "{kind:?}");
        }
        for kind in [QueueEvent::Ping, QueueEvent::Message, QueueEvent::Thought, QueueEvent::Action] {
            assert!(!kind.is_terminal(), "{kind:?}");
        }
    }

    #[test]
    fn wire_names_match_serde() {
        for kind in [
            QueueEvent::LongTermMemoryRecall,
            QueueEvent::Thought,
            QueueEvent::Message,
            QueueEvent::Think,
            QueueEvent::Action,
            QueueEvent::DatasetRetrieval,
            QueueEvent::WorkflowNodeMessage,
            QueueEvent::AgentEnd,
            QueueEvent::Ping,
            QueueEvent::Stop,
            QueueEvent::Timeout,
            QueueEvent::Error,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::Value::String(kind.as_str().into()));
        }
    }

    #[test]
    fn absorb_concatenates_text_and_replaces_the_rest() {
        let task = Uuid::new_v4();
        let id = Uuid::new_v4();
        let mut first = AgentThought::with_id(id, task, QueueEvent::Message);
        first.answer = "Hel".into();
        first.latency = 0.1;
        let mut second = AgentThought::with_id(id, task, QueueEvent::Message);
        second.answer = "lo".into();
        second.latency = 0.4;
        second.total_token_count = 7;

        first.absorb(second);
        assert_eq!(first.answer, "Hello");
        assert_eq!(first.latency, 0.4);
        assert_eq!(first.total_token_count, 7);
    }

    #[test]
    fn owner_prefix_follows_front_end() {
        assert_eq!(TaskOwner::new(InvokeFrom::Debugger, "u1").cache_value(), "account-u1");
        assert_eq!(TaskOwner::new(InvokeFrom::AssistantAgent, "u1").cache_value(), "account-u1");
        assert_eq!(TaskOwner::new(InvokeFrom::ServiceApi, "u1").cache_value(), "end-user-u1");
    }
}
