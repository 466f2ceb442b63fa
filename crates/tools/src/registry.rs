//! Tool providers and the per-agent toolset.
//!
//! Providers are registered as constructors keyed by `(provider_id,
//! tool_id)`. An agent's `[[agent.tools]]` entries are resolved through the
//! registry once, at startup, into a [`Toolset`] that the tools stage
//! looks up by the name the model uses.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tl_domain::config::ToolRef;
use tl_domain::error::{Error, Result};
use tl_domain::tool::ToolDefinition;

use crate::builtin::CurrentTime;
use crate::tool::{Blocking, Tool};

/// Builds a tool from the `params` of its config entry.
pub type ToolConstructor = Arc<dyn Fn(&Value) -> Result<Arc<dyn Tool>> + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolProviderRegistry {
    constructors: HashMap<(String, String), ToolConstructor>,
}

impl ToolProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the builtin providers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("time", "current_time", |_params| {
            Ok(Arc::new(Blocking::new(CurrentTime)) as Arc<dyn Tool>)
        });
        registry
    }

    pub fn register<F>(&mut self, provider_id: &str, tool_id: &str, constructor: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Tool>> + Send + Sync + 'static,
    {
        self.constructors
            .insert((provider_id.to_owned(), tool_id.to_owned()), Arc::new(constructor));
    }

    pub fn build(&self, tool_ref: &ToolRef) -> Result<Arc<dyn Tool>> {
        let key = (tool_ref.provider_id.clone(), tool_ref.tool_id.clone());
        let constructor = self.constructors.get(&key).ok_or_else(|| Error::Tool {
            tool: format!("{}/{}", tool_ref.provider_id, tool_ref.tool_id),
            message: "no such tool provider".into(),
        })?;
        constructor(&tool_ref.params)
    }

    /// Build every configured tool. Entries that fail are logged and left
    /// out so one bad tool does not take the agent down.
    pub fn build_toolset(&self, refs: &[ToolRef]) -> Toolset {
        let mut toolset = Toolset::default();
        for tool_ref in refs {
            match self.build(tool_ref) {
                Ok(tool) => toolset.insert(tool),
                Err(e) => tracing::warn!(
                    provider_id = %tool_ref.provider_id,
                    tool_id = %tool_ref.tool_id,
                    error = %e,
                    "skipping tool that failed to build"
                ),
            }
        }
        toolset
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Toolset
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The tools bound to one agent, in configuration order.
#[derive(Default, Clone)]
pub struct Toolset {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl Toolset {
    /// Add a tool. A later tool with the same name replaces the earlier one.
    pub fn insert(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        match self.by_name.get(&name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.by_name.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl FromIterator<Arc<dyn Tool>> for Toolset {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Tool>>>(iter: I) -> Self {
        let mut toolset = Toolset::default();
        for tool in iter {
            toolset.insert(tool);
        }
        toolset
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
