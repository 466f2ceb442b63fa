//! The function-calling agent.
//!
//! One task walks a fixed graph of stages on a spawned worker:
//!
//! ```text
//! preset_operation ──(moderated)──────────────────────────▶ end
//!        │
//!        ▼
//! long_term_memory_recall ─▶ llm ──(answer / cap)─────────▶ end
//!                             ▲ │
//!                             │ ▼ (tool calls)
//!                            tools
//! ```
//!
//! Stages only talk to the caller through the task channel. The caller
//! reads it with [`listen`], which also injects PING/TIMEOUT/STOP.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::{FutureExt, StreamExt};
use tracing::Instrument;
use uuid::Uuid;

use tl_domain::config::{AgentConfig, ModelPricing};
use tl_domain::error::{Error, Result};
use tl_domain::stream::{BoxStream, StreamEvent, Usage};
use tl_domain::thought::{AgentResult, AgentThought, QueueEvent};
use tl_domain::tool::{Message, ToolCall};
use tl_providers::util::estimate_tokens;
use tl_providers::{ChatRequest, LlmProvider};
use tl_tools::Toolset;

use super::aggregate::ThoughtAggregator;
use super::generation::{ChunkShape, GenerationType, Segment};
use super::history::{trim_history, validate_history};
use super::listener::{listen, WorkerGuard};
use super::queue::EventQueueRegistry;
use super::review::Review;
use super::tools;

/// Final answer when the model keeps calling tools past the iteration cap.
pub const MAX_ITERATION_RESPONSE: &str = "The agent reached its maximum number of iterations without producing an answer. Please rephrase the request or try again.";

const AGENT_SYSTEM_PROMPT_TEMPLATE: &str = "\
You are an assistant that answers the user's request, calling the available tools whenever they help.

<persona>
{preset_prompt}
</persona>

<long_term_memory>
{long_term_memory}
</long_term_memory>";

fn system_prompt(preset_prompt: &str, long_term_memory: &str) -> String {
    AGENT_SYSTEM_PROMPT_TEMPLATE
        .replace("{preset_prompt}", preset_prompt)
        .replace("{long_term_memory}", long_term_memory)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentState
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable context of one task. Owned by the worker; never shared.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub task_id: Uuid,
    /// Starts as `[user query]`; becomes the full prompt after recall.
    pub messages: Vec<Message>,
    /// Previous `[user, assistant]` rounds.
    pub history: Vec<Message>,
    pub long_term_memory: String,
    pub iteration_count: u32,
}

impl AgentState {
    pub fn new(query: impl Into<String>) -> Self {
        Self::with_images(query, &[])
    }

    pub fn with_images(query: impl Into<String>, image_urls: &[String]) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            messages: vec![Message::user_with_images(query, image_urls)],
            history: Vec::new(),
            long_term_memory: String::new(),
            iteration_count: 0,
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_long_term_memory(mut self, memory: impl Into<String>) -> Self {
        self.long_term_memory = memory.into();
        self
    }

    pub fn with_task_id(mut self, task_id: Uuid) -> Self {
        self.task_id = task_id;
        self
    }

    /// Text of the latest message (the user's query before recall).
    pub fn query(&self) -> &str {
        self.messages.last().and_then(|m| m.text()).unwrap_or_default()
    }

    pub fn image_urls(&self) -> Vec<String> {
        self.messages.last().map(|m| m.content.image_urls()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    PresetOperation,
    LongTermMemoryRecall,
    Llm,
    Tools,
    End,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::PresetOperation => "preset_operation",
            Stage::LongTermMemoryRecall => "long_term_memory_recall",
            Stage::Llm => "llm",
            Stage::Tools => "tools",
            Stage::End => "end",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FunctionCallAgent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct FunctionCallAgent {
    llm: Arc<dyn LlmProvider>,
    config: Arc<AgentConfig>,
    tools: Arc<Toolset>,
    queue: Arc<EventQueueRegistry>,
    review: Arc<Review>,
    pricing: ModelPricing,
    model: Option<String>,
}

impl FunctionCallAgent {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        config: AgentConfig,
        tools: Arc<Toolset>,
        queue: Arc<EventQueueRegistry>,
    ) -> Self {
        let review = Arc::new(Review::from_config(&config.review));
        Self {
            llm,
            config: Arc::new(config),
            tools,
            queue,
            review,
            pricing: ModelPricing::default(),
            model: None,
        }
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// Model sent with each request instead of the provider default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn queue(&self) -> &Arc<EventQueueRegistry> {
        &self.queue
    }

    /// Start the task on a worker and stream its events.
    ///
    /// The stream ends after the first terminal event. Dropping it, or its
    /// natural end, aborts the worker.
    pub fn stream(&self, state: AgentState) -> BoxStream<'static, AgentThought> {
        let task_id = state.task_id;
        let agent = self.clone();
        let span = tracing::info_span!(
            "agent.task",
            %task_id,
            provider = agent.llm.provider_id(),
            "otel.kind" = "INTERNAL",
        );

        let worker = tokio::spawn(
            async move {
                tracing::debug!("task started");
                let outcome = AssertUnwindSafe(agent.run(state)).catch_unwind().await;
                let error = match outcome {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => e.to_string(),
                    Err(panic) => format!("agent worker panicked: {}", panic_message(panic.as_ref())),
                };
                tracing::error!(error = %error, "task failed");
                agent.queue.publish_error(task_id, error).await;
            }
            .instrument(span),
        );

        listen(Arc::clone(&self.queue), task_id, Some(WorkerGuard::new(worker.abort_handle())))
    }

    /// Run the task to completion and fold its events.
    pub async fn invoke(&self, state: AgentState) -> AgentResult {
        let mut aggregator = ThoughtAggregator::new(state.query(), state.image_urls());
        let mut events = self.stream(state);
        while let Some(thought) = events.next().await {
            aggregator.push(thought);
        }
        aggregator.finish()
    }

    async fn run(&self, mut state: AgentState) -> Result<()> {
        let mut stage = Stage::PresetOperation;
        while stage != Stage::End {
            tracing::debug!(stage = stage.as_str(), iteration = state.iteration_count, "stage");
            stage = match stage {
                Stage::PresetOperation => self.preset_operation(&state).await,
                Stage::LongTermMemoryRecall => self.long_term_memory_recall(&mut state).await?,
                Stage::Llm => self.llm(&mut state).await?,
                Stage::Tools => {
                    tools::execute(&self.tools, &self.queue, &mut state).await;
                    Stage::Llm
                }
                Stage::End => Stage::End,
            };
        }
        Ok(())
    }

    // ── preset_operation ────────────────────────────────────────────

    async fn preset_operation(&self, state: &AgentState) -> Stage {
        let Some(preset) = self.review.check_input(state.query()) else {
            return Stage::LongTermMemoryRecall;
        };
        tracing::info!(task_id = %state.task_id, "input matched review keywords");

        let mut thought = AgentThought::new(state.task_id, QueueEvent::Message);
        thought.thought = preset.to_owned();
        thought.answer = preset.to_owned();
        thought.message = state.messages.clone();
        self.queue.publish(state.task_id, thought).await;
        self.publish_end(state.task_id).await;
        Stage::End
    }

    // ── long_term_memory_recall ─────────────────────────────────────

    async fn long_term_memory_recall(&self, state: &mut AgentState) -> Result<Stage> {
        let mut long_term_memory = "";
        if self.config.enable_long_term_memory {
            long_term_memory = state.long_term_memory.as_str();
            let mut thought = AgentThought::new(state.task_id, QueueEvent::LongTermMemoryRecall);
            thought.observation = long_term_memory.to_owned();
            self.queue.publish(state.task_id, thought).await;
        }
        let mut messages = vec![Message::system(system_prompt(&self.config.preset_prompt, long_term_memory))];

        validate_history(&state.history)?;
        let llm = Arc::clone(&self.llm);
        messages.extend(trim_history(
            &state.history,
            self.config.dialog_round,
            self.config.max_history_tokens,
            |m| llm.count_tokens(m),
        ));

        let human = state
            .messages
            .pop()
            .ok_or_else(|| Error::Other("agent state has no user message".into()))?;
        messages.push(human);
        state.messages = messages;
        Ok(Stage::Llm)
    }

    // ── llm ─────────────────────────────────────────────────────────

    async fn llm(&self, state: &mut AgentState) -> Result<Stage> {
        let task_id = state.task_id;
        if state.iteration_count > self.config.max_iteration_count {
            tracing::warn!(%task_id, iterations = state.iteration_count, "iteration cap reached");
            let mut thought = AgentThought::new(task_id, QueueEvent::Message);
            thought.thought = MAX_ITERATION_RESPONSE.to_owned();
            thought.answer = MAX_ITERATION_RESPONSE.to_owned();
            thought.message = state.messages.clone();
            self.queue.publish(task_id, thought).await;
            self.publish_end(task_id).await;
            return Ok(Stage::End);
        }

        let bind_tools = self.llm.capabilities().can_call_tools() && !self.tools.is_empty();
        let req = ChatRequest {
            messages: state.messages.clone(),
            tools: if bind_tools { self.tools.definitions() } else { Vec::new() },
            temperature: self.config.temperature,
            max_tokens: None,
            model: self.model.clone(),
        };

        let span = tracing::info_span!(
            "llm.call",
            "otel.kind" = "CLIENT",
            model = req.model.as_deref().unwrap_or(self.llm.default_model()),
            iteration = state.iteration_count,
            input_tokens = tracing::field::Empty,
            output_tokens = tracing::field::Empty,
        );
        let generated = self.stream_model(state, &req).instrument(span.clone()).await?;

        let (input_tokens, output_tokens) = match generated.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => (self.llm.count_tokens(&req.messages), generated.estimate_output_tokens()),
        };
        span.record("input_tokens", input_tokens);
        span.record("output_tokens", output_tokens);

        if !generated.tool_calls.is_empty() {
            let mut thought = self.accounted(
                AgentThought::with_id(generated.segment_id, task_id, QueueEvent::Thought),
                &req,
                input_tokens,
                output_tokens,
                generated.latency,
            );
            thought.thought = serde_json::to_string(&generated.tool_calls)?;
            self.queue.publish(task_id, thought).await;

            state
                .messages
                .push(Message::assistant_tool_calls(&generated.text, &generated.tool_calls));
            return Ok(Stage::Tools);
        }

        // Answer segments close under their own id; anything else (empty
        // or reasoning-only output) gets a fresh message step.
        let id = match generated.kind {
            Some(GenerationType::Message) => generated.segment_id,
            _ => Uuid::new_v4(),
        };
        let thought = self.accounted(
            AgentThought::with_id(id, task_id, QueueEvent::Message),
            &req,
            input_tokens,
            output_tokens,
            generated.latency,
        );
        self.queue.publish(task_id, thought).await;
        self.publish_end(task_id).await;
        Ok(Stage::End)
    }

    /// Stream one model response, publishing THINK/MESSAGE chunks as they
    /// arrive.
    async fn stream_model(&self, state: &AgentState, req: &ChatRequest) -> Result<Generated> {
        let task_id = state.task_id;
        let mut stream = self.llm.chat_stream(req).await?;
        let mut segment = Segment::new();
        let mut out = Generated::default();
        // call_id -> (tool name, argument buffer), in arrival order.
        let mut open_calls: Vec<(String, String, String)> = Vec::new();

        while let Some(event) = stream.next().await {
            let event = event?;

            if let Some(shape) = ChunkShape::of(&event) {
                let kind = segment.observe(shape);
                let text = match (&event, kind) {
                    (StreamEvent::Token { text }, GenerationType::Message)
                    | (StreamEvent::Thinking { text }, GenerationType::Think) => Some(text.as_str()),
                    _ => None,
                };
                if let (Some(text), Some(event_kind)) = (text, kind.chunk_event()) {
                    let content = self.review.redact(text);
                    let mut thought = AgentThought::with_id(segment.id(), task_id, event_kind);
                    if event_kind == QueueEvent::Message {
                        thought.answer = content.clone();
                    }
                    thought.thought = content;
                    thought.message = req.messages.clone();
                    thought.latency = segment.latency();
                    self.queue.publish(task_id, thought).await;
                }
            }

            match event {
                StreamEvent::Token { text } => out.text.push_str(&text),
                StreamEvent::Thinking { text } => out.reasoning.push_str(&text),
                StreamEvent::ToolCallStarted { call_id, tool_name } => {
                    open_calls.push((call_id, tool_name, String::new()));
                }
                StreamEvent::ToolCallDelta { call_id, delta } => {
                    if let Some((_, _, args)) = open_calls.iter_mut().find(|(id, _, _)| *id == call_id) {
                        args.push_str(&delta);
                    }
                }
                StreamEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                    open_calls.retain(|(id, _, _)| *id != call_id);
                    out.tool_calls.push(ToolCall { call_id, tool_name, arguments });
                }
                StreamEvent::Done { usage, .. } => {
                    if usage.is_some() {
                        out.usage = usage;
                    }
                }
                StreamEvent::Error { message } => {
                    return Err(Error::Provider { provider: self.llm.provider_id().to_owned(), message });
                }
            }
        }

        // Calls that streamed a start but never a finish.
        for (call_id, tool_name, args) in open_calls {
            let arguments = if args.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(&args).unwrap_or_else(|e| {
                    tracing::warn!(%call_id, tool = %tool_name, error = %e, "tool call arguments are not valid JSON");
                    serde_json::Value::Object(Default::default())
                })
            };
            out.tool_calls.push(ToolCall { call_id, tool_name, arguments });
        }

        out.kind = segment.kind();
        out.segment_id = segment.id();
        out.latency = segment.latency();
        Ok(out)
    }

    /// Fill the accounting fields of a closing THOUGHT or MESSAGE.
    fn accounted(
        &self,
        mut thought: AgentThought,
        req: &ChatRequest,
        input_tokens: u32,
        output_tokens: u32,
        latency: f64,
    ) -> AgentThought {
        thought.message = req.messages.clone();
        thought.message_token_count = input_tokens;
        thought.message_unit_price = self.pricing.input;
        thought.message_price_unit = self.pricing.unit;
        thought.answer_token_count = output_tokens;
        thought.answer_unit_price = self.pricing.output;
        thought.answer_price_unit = self.pricing.unit;
        thought.total_token_count = input_tokens + output_tokens;
        thought.total_price = self.pricing.estimate_cost(input_tokens, output_tokens);
        thought.latency = latency;
        thought
    }

    async fn publish_end(&self, task_id: Uuid) {
        self.queue.publish(task_id, AgentThought::new(task_id, QueueEvent::AgentEnd)).await;
    }
}

/// Everything one model call produced.
#[derive(Debug, Default)]
struct Generated {
    kind: Option<GenerationType>,
    segment_id: Uuid,
    latency: f64,
    text: String,
    reasoning: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

impl Generated {
    fn estimate_output_tokens(&self) -> u32 {
        let calls = if self.tool_calls.is_empty() {
            0
        } else {
            serde_json::to_string(&self.tool_calls).map(|s| estimate_tokens(&s)).unwrap_or(0)
        };
        estimate_tokens(&self.text) + estimate_tokens(&self.reasoning) + calls
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tl_domain::config::{ReviewConfig, StreamConfig};
    use tl_domain::thought::{AgentStatus, InvokeFrom, TaskOwner};
    use tl_domain::tool::Role;

    use crate::runtime::aggregate::fold;
    use crate::runtime::store::{KvStore, MemoryKvStore};
    use crate::runtime::testing::{
        done, shared, thinking, token, tool_call, EchoTool, HangingTool, ScriptedProvider, Turn,
    };

    fn owner() -> TaskOwner {
        TaskOwner::new(InvokeFrom::WebApp, "alice")
    }

    fn queue(store: Arc<dyn KvStore>) -> Arc<EventQueueRegistry> {
        Arc::new(EventQueueRegistry::new(store, owner(), StreamConfig::default()))
    }

    fn agent_with(provider: Arc<ScriptedProvider>, config: AgentConfig, tools: Toolset) -> FunctionCallAgent {
        FunctionCallAgent::new(provider, config, Arc::new(tools), queue(Arc::new(MemoryKvStore::new())))
    }

    fn echo_tools() -> Toolset {
        [shared(EchoTool("echo"))].into_iter().collect()
    }

    fn events(turn: Vec<Vec<Result<StreamEvent>>>) -> Turn {
        Turn::Events(turn.into_iter().flatten().collect())
    }

    async fn collect(agent: &FunctionCallAgent, state: AgentState) -> Vec<AgentThought> {
        agent.stream(state).collect().await
    }

    fn kinds(thoughts: &[AgentThought]) -> Vec<QueueEvent> {
        thoughts.iter().map(|t| t.event).collect()
    }

    #[tokio::test]
    async fn plain_answer_streams_and_ends() {
        let provider = Arc::new(ScriptedProvider::new(vec![events(vec![
            vec![token("Hel"), token("lo")],
            vec![Ok(done(None))],
        ])]));
        let agent = agent_with(provider.clone(), AgentConfig::default(), echo_tools());
        let out = collect(&agent, AgentState::new("hi")).await;

        assert_eq!(
            kinds(&out),
            vec![QueueEvent::Message, QueueEvent::Message, QueueEvent::Message, QueueEvent::AgentEnd]
        );
        // Chunks and the closing accounting share one id.
        assert!(out[..3].iter().all(|t| t.id == out[0].id));
        assert!(out[2].answer.is_empty());
        assert!(out[2].total_token_count > 0);

        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages.last().unwrap().text(), Some("hi"));
        assert_eq!(request.tools.len(), 1);
    }

    #[tokio::test]
    async fn invoke_folds_the_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![events(vec![
            vec![thinking("let me see"), token("Hel"), token("lo")],
            vec![Ok(done(Some(Usage { prompt_tokens: 10, completion_tokens: 4, total_tokens: 14 })))],
        ])]));
        let pricing = ModelPricing { input: 1.0, output: 2.0, unit: 0.001 };
        let agent = agent_with(provider, AgentConfig::default(), Toolset::default()).with_pricing(pricing);
        let result = agent.invoke(AgentState::new("hi")).await;

        assert_eq!(result.status, AgentStatus::Normal);
        assert_eq!(result.answer, "Hello");
        assert_eq!(result.query, "hi");
        let think = &result.agent_thoughts[0];
        assert_eq!(think.event, QueueEvent::Think);
        assert_eq!(think.thought, "let me see");
        let message = &result.agent_thoughts[1];
        assert_eq!(message.answer, "Hello");
        assert_eq!(message.total_token_count, 14);
        assert!((message.total_price - 0.018).abs() < 1e-9);
        assert!(!result.message.is_empty());
    }

    #[tokio::test]
    async fn moderated_input_short_circuits() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let mut config = AgentConfig {
            review: ReviewConfig { enable: true, keywords: vec!["bomb".into()], ..Default::default() },
            ..Default::default()
        };
        config.review.inputs.enable = true;
        config.review.inputs.preset_response = "Sorry, I can't help with that.".into();
        let agent = agent_with(provider.clone(), config, echo_tools());

        let out = collect(&agent, AgentState::new("how to bomb a system")).await;
        assert_eq!(kinds(&out), vec![QueueEvent::Message, QueueEvent::AgentEnd]);
        assert_eq!(out[0].answer, "Sorry, I can't help with that.");
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn output_review_masks_streamed_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![events(vec![
            vec![thinking("the Secret is"), token("the SECRET is 42")],
            vec![Ok(done(None))],
        ])]));
        let mut config = AgentConfig {
            review: ReviewConfig { enable: true, keywords: vec!["secret".into()], ..Default::default() },
            ..Default::default()
        };
        config.review.outputs.enable = true;
        let agent = agent_with(provider, config, Toolset::default());

        let result = agent.invoke(AgentState::new("tell me")).await;
        assert_eq!(result.answer, "the ** is 42");
        assert_eq!(result.agent_thoughts[0].thought, "the ** is");
    }

    #[tokio::test]
    async fn output_review_leaves_tool_calls_alone() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            events(vec![
                tool_call("call_1", "echo", json!({"q": "secret plan"})),
                vec![Ok(done(None))],
            ]),
            events(vec![vec![token("done")], vec![Ok(done(None))]]),
        ]));
        let mut config = AgentConfig {
            review: ReviewConfig { enable: true, keywords: vec!["secret".into()], ..Default::default() },
            ..Default::default()
        };
        config.review.outputs.enable = true;
        let agent = agent_with(provider, config, echo_tools());
        let out = collect(&agent, AgentState::new("plan?")).await;

        let thought = out.iter().find(|t| t.event == QueueEvent::Thought).unwrap();
        assert!(thought.thought.contains("secret plan"), "{}", thought.thought);
        let action = out.iter().find(|t| t.event == QueueEvent::Action).unwrap();
        assert_eq!(action.tool_input, json!({"q": "secret plan"}));
    }

    #[tokio::test]
    async fn think_then_tool_call_opens_a_new_step() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            events(vec![
                vec![thinking("I should look it up")],
                tool_call("call_1", "echo", json!({"q": "weather"})),
                vec![Ok(done(None))],
            ]),
            events(vec![vec![token("Sunny.")], vec![Ok(done(None))]]),
        ]));
        let agent = agent_with(provider.clone(), AgentConfig::default(), echo_tools());
        let out = collect(&agent, AgentState::new("weather?")).await;

        assert_eq!(
            kinds(&out),
            vec![
                QueueEvent::Think,
                QueueEvent::Thought,
                QueueEvent::Action,
                QueueEvent::Message,
                QueueEvent::Message,
                QueueEvent::AgentEnd,
            ]
        );
        assert_ne!(out[0].id, out[1].id);

        let calls: Vec<ToolCall> = serde_json::from_str(&out[1].thought).unwrap();
        assert_eq!(calls[0].call_id, "call_1");
        assert_eq!(calls[0].tool_name, "echo");
        assert_eq!(out[2].observation, json!({"echo": {"q": "weather"}}).to_string());

        // Second model call sees the tool round trip.
        let second = &provider.requests()[1].messages;
        let roles: Vec<_> = second.iter().map(|m| m.role).collect();
        assert_eq!(&roles[roles.len() - 2..], &[Role::Assistant, Role::Tool]);
    }

    #[tokio::test]
    async fn message_then_tool_call_upgrades() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            events(vec![
                vec![token("Let me check. ")],
                tool_call("c1", "echo", json!({})),
                vec![Ok(done(None))],
            ]),
            events(vec![vec![token("Done.")]]),
        ]));
        let agent = agent_with(provider.clone(), AgentConfig::default(), echo_tools());
        let result = agent.invoke(AgentState::new("go")).await;

        let kinds: Vec<_> = result.agent_thoughts.iter().map(|t| t.event).collect();
        assert_eq!(
            kinds,
            vec![
                QueueEvent::Message,
                QueueEvent::Thought,
                QueueEvent::Action,
                QueueEvent::Message,
                QueueEvent::AgentEnd,
            ]
        );
        assert_eq!(result.answer, "Let me check. Done.");
        let replay = provider.requests()[1].messages.clone();
        let assistant = &replay[replay.len() - 2];
        assert_eq!(assistant.text(), Some("Let me check. "));
    }

    #[tokio::test]
    async fn iteration_cap_ends_normally() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            events(vec![tool_call("c1", "echo", json!({}))]),
            events(vec![tool_call("c2", "echo", json!({}))]),
            events(vec![tool_call("c3", "echo", json!({}))]),
        ]));
        let config = AgentConfig { max_iteration_count: 1, ..Default::default() };
        let agent = agent_with(provider.clone(), config, echo_tools());
        let result = agent.invoke(AgentState::new("loop forever")).await;

        assert_eq!(result.status, AgentStatus::Normal);
        assert_eq!(result.answer, MAX_ITERATION_RESPONSE);
        assert_eq!(provider.requests().len(), 2);
        let actions = result.agent_thoughts.iter().filter(|t| t.event == QueueEvent::Action).count();
        assert_eq!(actions, 2);
    }

    #[tokio::test]
    async fn stream_error_ends_with_one_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Turn::Events(vec![
            token("partial"),
            Ok(StreamEvent::Error { message: "rate limited".into() }),
            token("never"),
        ])]));
        let agent = agent_with(provider, AgentConfig::default(), Toolset::default());
        let out = collect(&agent, AgentState::new("hi")).await;

        assert_eq!(kinds(&out), vec![QueueEvent::Message, QueueEvent::Error]);
        assert!(out[1].observation.contains("rate limited"));

        let result = fold("hi", &[], &out);
        assert_eq!(result.status, AgentStatus::Error);
        assert_eq!(result.answer, "partial");
    }

    #[tokio::test]
    async fn request_failure_and_panic_become_errors() {
        let provider = Arc::new(ScriptedProvider::new(vec![Turn::Fail("connection reset".into())]));
        let agent = agent_with(provider, AgentConfig::default(), Toolset::default());
        let out = collect(&agent, AgentState::new("hi")).await;
        assert_eq!(kinds(&out), vec![QueueEvent::Error]);
        assert!(out[0].observation.contains("connection reset"));

        let provider = Arc::new(ScriptedProvider::new(vec![Turn::Panic]));
        let agent = agent_with(provider, AgentConfig::default(), Toolset::default());
        let out = collect(&agent, AgentState::new("hi")).await;
        assert_eq!(kinds(&out), vec![QueueEvent::Error]);
        assert!(out[0].observation.contains("panicked"));
    }

    #[tokio::test]
    async fn malformed_history_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let agent = agent_with(provider.clone(), AgentConfig::default(), Toolset::default());
        let state = AgentState::new("hi").with_history(vec![Message::user("dangling")]);
        let result = agent.invoke(state).await;

        assert_eq!(result.status, AgentStatus::Error);
        assert!(result.error.contains("complete user/assistant rounds"));
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn memory_and_history_shape_the_prompt() {
        let provider = Arc::new(ScriptedProvider::new(vec![events(vec![vec![token("ok")]])]));
        let config = AgentConfig {
            preset_prompt: "You are a travel agent.".into(),
            enable_long_term_memory: true,
            dialog_round: 1,
            ..Default::default()
        };
        let agent = agent_with(provider.clone(), config, Toolset::default());
        let state = AgentState::new("and tomorrow?")
            .with_long_term_memory("User lives in Lisbon.")
            .with_history(vec![
                Message::user("old q"),
                Message::assistant("old a"),
                Message::user("weather today?"),
                Message::assistant("Sunny."),
            ]);
        let out = collect(&agent, state).await;

        assert_eq!(out[0].event, QueueEvent::LongTermMemoryRecall);
        assert_eq!(out[0].observation, "User lives in Lisbon.");

        let messages = &provider.requests()[0].messages;
        let system = messages[0].text().unwrap();
        assert!(system.contains("You are a travel agent."));
        assert!(system.contains("User lives in Lisbon."));
        let texts: Vec<_> = messages[1..].iter().filter_map(|m| m.text()).collect();
        assert_eq!(texts, vec!["weather today?", "Sunny.", "and tomorrow?"]);
    }

    #[tokio::test]
    async fn empty_or_reasoning_only_output_still_ends() {
        let provider = Arc::new(ScriptedProvider::new(vec![events(vec![
            vec![thinking("hmm")],
            vec![Ok(done(None))],
        ])]));
        let agent = agent_with(provider, AgentConfig::default(), Toolset::default());
        let out = collect(&agent, AgentState::new("hi")).await;

        assert_eq!(kinds(&out), vec![QueueEvent::Think, QueueEvent::Message, QueueEvent::AgentEnd]);
        assert_ne!(out[0].id, out[1].id);

        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let agent = agent_with(provider, AgentConfig::default(), Toolset::default());
        let result = agent.invoke(AgentState::new("hi")).await;
        assert_eq!(result.status, AgentStatus::Normal);
        assert_eq!(result.answer, "");
    }

    #[tokio::test]
    async fn tools_unbound_without_capability() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![events(vec![vec![token("ok")]])]).without_tools(),
        );
        let agent = agent_with(provider.clone(), AgentConfig::default(), echo_tools());
        agent.invoke(AgentState::new("hi")).await;
        assert!(provider.requests()[0].tools.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_task_gets_pings() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![events(vec![
                vec![token("a"), token("b"), token("c"), token("d"), token("e")],
                vec![Ok(done(None))],
            ])])
            .with_chunk_delay(Duration::from_secs(5)),
        );
        let agent = agent_with(provider, AgentConfig::default(), Toolset::default());
        let out = collect(&agent, AgentState::new("slow")).await;

        let pings = out.iter().filter(|t| t.event == QueueEvent::Ping).count();
        assert!(pings >= 2, "got {pings} pings");
        assert_eq!(out.last().unwrap().event, QueueEvent::AgentEnd);

        let result = fold("slow", &[], &out);
        assert_eq!(result.answer, "abcde");
        assert!(result.agent_thoughts.iter().all(|t| t.event != QueueEvent::Ping));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_tool_times_out_and_worker_is_aborted() {
        let tools: Toolset = [shared(HangingTool)].into_iter().collect();
        let provider = Arc::new(ScriptedProvider::new(vec![events(vec![tool_call("c1", "hang", json!({}))])]));
        let agent = agent_with(provider, AgentConfig::default(), tools);
        let state = AgentState::new("hang");
        let task_id = state.task_id;

        let result = agent.invoke(state).await;
        assert_eq!(result.status, AgentStatus::Timeout);
        assert_eq!(
            result.agent_thoughts.last().map(|t| t.event),
            Some(QueueEvent::Timeout)
        );
        assert!(result.agent_thoughts.iter().all(|t| t.task_id == task_id));
    }

    #[tokio::test(start_paused = true)]
    async fn owner_stop_truncates_the_stream() {
        let store: Arc<MemoryKvStore> = Arc::new(MemoryKvStore::new());
        let provider = Arc::new(ScriptedProvider::new(vec![Turn::Hang]));
        let agent = FunctionCallAgent::new(
            provider,
            AgentConfig::default(),
            Arc::new(Toolset::default()),
            queue(store.clone()),
        );
        let state = AgentState::new("hi");
        let task_id = state.task_id;

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let stranger = TaskOwner::new(InvokeFrom::WebApp, "mallory");
            EventQueueRegistry::request_stop(store.as_ref(), task_id, &stranger, &StreamConfig::default()).await;
            tokio::time::sleep(Duration::from_secs(3)).await;
            EventQueueRegistry::request_stop(store.as_ref(), task_id, &owner(), &StreamConfig::default()).await;
        });

        let start = tokio::time::Instant::now();
        let result = agent.invoke(state).await;
        stopper.await.unwrap();
        assert_eq!(result.status, AgentStatus::Stop);
        assert!(start.elapsed() >= Duration::from_secs(6));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
