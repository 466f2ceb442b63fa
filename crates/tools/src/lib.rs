//! Tools the agent can call.
//!
//! Every tool (builtin, HTTP API, MCP, knowledge-base retrieval, sub-workflow)
//! sits behind the single [`Tool`] capability. Synchronous implementations
//! use [`SyncTool`] and are bridged onto the blocking pool; workflows also
//! expose a node-by-node stream through [`WorkflowTool`].

pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::{ToolConstructor, ToolProviderRegistry, Toolset};
pub use tool::{Blocking, SyncTool, Tool, WorkflowNodeResult, WorkflowTool};

/// Name of the reserved knowledge-base retrieval tool. Its results are
/// published as dataset-retrieval events instead of plain actions.
pub const DATASET_RETRIEVAL_TOOL_NAME: &str = "dataset_retrieval";
