use serde::{Deserialize, Serialize};

/// What a bound model can do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmCapabilities {
    /// Function calling. Tools are only bound to requests when set.
    pub supports_tools: bool,
}

impl LlmCapabilities {
    pub fn can_call_tools(&self) -> bool {
        self.supports_tools
    }
}
