//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure OpenAI, DeepSeek, Ollama, vLLM and any other
//! endpoint that follows the chat completions streaming contract. Models
//! that expose a reasoning channel (`delta.reasoning_content`) surface it as
//! [`StreamEvent::Thinking`].

use crate::traits::{ChatRequest, LlmProvider};
use crate::util::{from_reqwest, resolve_api_key};
use serde_json::Value;
use tl_domain::capability::LlmCapabilities;
use tl_domain::config::{ProviderConfig, ProviderKind};
use tl_domain::error::{Error, Result};
use tl_domain::stream::{BoxStream, StreamEvent, Usage};
use tl_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Azure uses the same wire format with a deployment URL
/// (`/openai/deployments/{model}/chat/completions`) and an `api-key` header.
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    auth_header: String,
    auth_prefix: String,
    default_model: String,
    capabilities: LlmCapabilities,
    client: reqwest::Client,
    is_azure: bool,
}

impl OpenAiCompatProvider {
    pub fn from_config(cfg: &ProviderConfig, timeout_ms: u64) -> Result<Self> {
        let is_azure = cfg.kind == ProviderKind::AzureOpenai;
        let api_key = resolve_api_key(&cfg.auth)?;

        let auth_header = cfg.auth.header.clone().unwrap_or_else(|| {
            if is_azure { "api-key".into() } else { "Authorization".into() }
        });
        let auth_prefix = cfg.auth.prefix.clone().unwrap_or_else(|| {
            if is_azure { String::new() } else { "Bearer ".into() }
        });

        let capabilities = LlmCapabilities { supports_tools: cfg.supports_tools };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            auth_header,
            auth_prefix,
            default_model: cfg.default_model.clone().unwrap_or_else(|| "gpt-4o-mini".into()),
            capabilities,
            client,
            is_azure,
        })
    }

    fn effective_model<'a>(&'a self, req: &'a ChatRequest) -> &'a str {
        req.model.as_deref().unwrap_or(&self.default_model)
    }

    fn chat_url(&self, req: &ChatRequest) -> String {
        if self.is_azure {
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version=2024-10-21",
                self.base_url,
                self.effective_model(req)
            )
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        // Azure carries the deployment in the URL.
        if !self.is_azure {
            body["model"] = Value::String(self.effective_model(req).to_owned());
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_openai).collect());
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        role => serde_json::json!({
            "role": role_to_str(role),
            "content": content_to_openai(&msg.content),
        }),
    }
}

/// Plain text stays a string; text plus images becomes the parts array.
fn content_to_openai(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(t) => Value::String(t.clone()),
        MessageContent::Parts(parts) => {
            let items: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => {
                        Some(serde_json::json!({"type": "text", "text": text}))
                    }
                    ContentPart::Image { url, .. } => Some(serde_json::json!({
                        "type": "image_url",
                        "image_url": {"url": url},
                    })),
                    _ => None,
                })
                .collect();
            Value::Array(items)
        }
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": input.to_string()},
                        }));
                    }
                    _ => {}
                }
            }
        }
    }

    obj["content"] = if text_parts.is_empty() {
        Value::Null
    } else {
        Value::String(text_parts.join("\n"))
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    let (id, content) = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .find_map(|p| match p {
                ContentPart::ToolResult { tool_use_id, content, .. } => {
                    Some((tool_use_id.as_str(), content.as_str()))
                }
                _ => None,
            })
            .unwrap_or(("", "")),
        MessageContent::Text(t) => ("", t.as_str()),
    };
    serde_json::json!({"role": "tool", "tool_call_id": id, "content": content})
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE stream parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
struct OpenCall {
    index: u64,
    call_id: String,
    tool_name: String,
    arguments: String,
}

/// Stateful parser for one streamed completion.
///
/// Tool-call fragments after the first carry only `index`, so calls are
/// tracked by index and every emitted event uses the id from the opening
/// fragment. Calls are closed with `ToolCallFinished` when the choice
/// reports a finish reason (or at `[DONE]` if it never does).
#[derive(Debug, Default)]
pub(crate) struct StreamParser {
    calls: Vec<OpenCall>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

impl StreamParser {
    pub(crate) fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data.trim() == "[DONE]" {
            let mut out = self.close_calls();
            out.push(Ok(StreamEvent::Done {
                usage: self.usage.take(),
                finish_reason: self.finish_reason.take().or_else(|| Some("stop".into())),
            }));
            return out;
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        if let Some(err) = v.get("error") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("stream error")
                .to_string();
            return vec![Ok(StreamEvent::Error { message })];
        }

        if let Some(usage) = v.get("usage").and_then(parse_openai_usage) {
            self.usage = Some(usage);
        }

        let Some(choice) = v.get("choices").and_then(|c| c.as_array()).and_then(|a| a.first())
        else {
            // Usage-only chunk (stream_options.include_usage).
            return Vec::new();
        };

        let mut out = Vec::new();
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(text) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                out.push(Ok(StreamEvent::Thinking { text: text.to_string() }));
            }
        }
        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                out.push(Ok(StreamEvent::Token { text: text.to_string() }));
            }
        }
        if let Some(fragments) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for fragment in fragments {
                self.tool_fragment(fragment, &mut out);
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            self.finish_reason = Some(reason.to_string());
            out.extend(self.close_calls());
        }
        out
    }

    fn tool_fragment(&mut self, fragment: &Value, out: &mut Vec<Result<StreamEvent>>) {
        let index = fragment.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
        let function = fragment.get("function");
        let name = function
            .and_then(|f| f.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let args = function
            .and_then(|f| f.get("arguments"))
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let pos = match self.calls.iter().position(|c| c.index == index) {
            Some(pos) => pos,
            None => {
                let call_id = fragment
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("call_{index}"));
                out.push(Ok(StreamEvent::ToolCallStarted {
                    call_id: call_id.clone(),
                    tool_name: name.to_string(),
                }));
                self.calls.push(OpenCall {
                    index,
                    call_id,
                    tool_name: name.to_string(),
                    arguments: String::new(),
                });
                self.calls.len() - 1
            }
        };

        let call = &mut self.calls[pos];
        if call.tool_name.is_empty() && !name.is_empty() {
            call.tool_name = name.to_string();
        }
        if !args.is_empty() {
            call.arguments.push_str(args);
            out.push(Ok(StreamEvent::ToolCallDelta {
                call_id: call.call_id.clone(),
                delta: args.to_string(),
            }));
        }
    }

    fn close_calls(&mut self) -> Vec<Result<StreamEvent>> {
        self.calls
            .drain(..)
            .map(|c| {
                let arguments = if c.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&c.arguments)
                        .unwrap_or(Value::Object(Default::default()))
                };
                Ok(StreamEvent::ToolCallFinished {
                    call_id: c.call_id,
                    tool_name: c.tool_name,
                    arguments,
                })
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = self.chat_url(req);
        let body = self.build_chat_body(req);

        tracing::debug!(
            provider = %self.id,
            url = %url,
            tools = req.tools.len(),
            "openai_compat stream request"
        );

        let resp = self
            .client
            .post(&url)
            .header(&self.auth_header, format!("{}{}", self.auth_prefix, self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        let mut parser = StreamParser::default();
        Ok(crate::sse::sse_response_stream(resp, move |data| parser.parse(data)))
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
