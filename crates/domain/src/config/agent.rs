use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the function-calling agent behaves for one app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Persona and instructions placed at the top of the system prompt.
    #[serde(default)]
    pub preset_prompt: String,
    /// Emit a recall event and inject the caller-supplied memory summary.
    #[serde(default)]
    pub enable_long_term_memory: bool,
    /// Model turns allowed after tool rounds before the agent gives up.
    #[serde(default = "d_5")]
    pub max_iteration_count: u32,
    /// Most recent user/assistant rounds kept from history.
    #[serde(default = "d_3")]
    pub dialog_round: usize,
    /// Token budget for the kept history.
    #[serde(default = "d_2000")]
    pub max_history_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub tools: Vec<ToolRef>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            preset_prompt: String::new(),
            enable_long_term_memory: false,
            max_iteration_count: d_5(),
            dialog_round: d_3(),
            max_history_tokens: d_2000(),
            temperature: None,
            review: ReviewConfig::default(),
            tools: Vec::new(),
        }
    }
}

/// Keyword moderation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewConfig {
    #[serde(default)]
    pub enable: bool,
    /// Matched case-insensitively as plain substrings.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub inputs: ReviewInputsConfig,
    #[serde(default)]
    pub outputs: ReviewOutputsConfig,
}

impl ReviewConfig {
    pub fn inputs_enabled(&self) -> bool {
        self.enable && self.inputs.enable
    }

    pub fn outputs_enabled(&self) -> bool {
        self.enable && self.outputs.enable
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewInputsConfig {
    #[serde(default)]
    pub enable: bool,
    /// Answer returned instead of running the model when the input matches.
    #[serde(default)]
    pub preset_response: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewOutputsConfig {
    #[serde(default)]
    pub enable: bool,
}

/// A tool bound to the agent, looked up by `(provider_id, tool_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRef {
    pub provider_id: String,
    pub tool_id: String,
    /// Constructor parameters passed to the tool provider.
    #[serde(default)]
    pub params: serde_json::Value,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_5() -> u32 {
    5
}
fn d_3() -> usize {
    3
}
fn d_2000() -> u32 {
    2000
}
