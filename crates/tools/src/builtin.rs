//! Builtin tool providers.

use serde_json::Value;
use tl_domain::error::Result;
use tl_domain::tool::ToolDefinition;

use crate::tool::SyncTool;

/// `("time", "current_time")`: the server's local time.
pub struct CurrentTime;

impl SyncTool for CurrentTime {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "current_time".into(),
            description: "Get the current local date and time, including the timezone.".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    fn invoke_blocking(&self, _args: Value) -> Result<Value> {
        let now = chrono::Local::now();
        Ok(Value::String(now.format("%Y-%m-%d %H:%M:%S %Z").to_string()))
    }
}
