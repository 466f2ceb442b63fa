use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tl_domain::error::{Error, Result};
use tl_domain::stream::BoxStream;
use tl_domain::tool::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One callable tool. `invoke` receives the model's arguments as a JSON
/// object and returns a JSON-serializable result.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn invoke(&self, args: Value) -> Result<Value>;

    /// The streaming side of a sub-workflow tool, if this is one.
    fn as_workflow(&self) -> Option<&dyn WorkflowTool> {
        None
    }
}

/// A tool whose work is synchronous (CPU-bound or a blocking client).
pub trait SyncTool: Send + Sync + 'static {
    fn definition(&self) -> ToolDefinition;

    fn invoke_blocking(&self, args: Value) -> Result<Value>;
}

/// Runs a [`SyncTool`] on tokio's blocking pool so it never stalls the
/// agent worker.
pub struct Blocking<T>(Arc<T>);

impl<T: SyncTool> Blocking<T> {
    pub fn new(tool: T) -> Self {
        Self(Arc::new(tool))
    }
}

#[async_trait::async_trait]
impl<T: SyncTool> Tool for Blocking<T> {
    fn definition(&self) -> ToolDefinition {
        self.0.definition()
    }

    async fn invoke(&self, args: Value) -> Result<Value> {
        let tool = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || tool.invoke_blocking(args))
            .await
            .map_err(|e| Error::Tool {
                tool: self.0.definition().name,
                message: format!("blocking task failed: {e}"),
            })?
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflow tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of one node of a workflow run, published as it completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNodeResult {
    pub node_id: String,
    pub node_type: String,
    pub title: String,
    pub status: String,
    #[serde(default)]
    pub inputs: Value,
    /// Outputs of this node. The last node's outputs are the workflow result.
    #[serde(default)]
    pub outputs: Value,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub latency: f64,
}

#[async_trait::async_trait]
pub trait WorkflowTool: Send + Sync {
    /// Human-readable workflow name shown alongside node events.
    fn display_name(&self) -> &str;

    async fn stream(&self, args: Value) -> Result<BoxStream<'static, Result<WorkflowNodeResult>>>;
}
