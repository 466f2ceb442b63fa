use std::sync::Arc;

use tl_domain::config::Config;
use tl_providers::registry::ProviderRegistry;
use tl_tools::Toolset;

use crate::runtime::{EventQueueRegistry, FunctionCallAgent, KvStore, TaskOwner};

/// Shared application state passed to all API handlers.
///
/// Each chat builds its own task channel and agent from these pieces; only
/// the key-value store is shared between tasks, so a stop request made on
/// one connection reaches a task streaming on another.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,
    /// Belongs-to and stop markers for every task.
    pub store: Arc<dyn KvStore>,
    /// Tools bound on every task.
    pub tools: Arc<Toolset>,
}

impl AppState {
    /// A fresh agent, with its own task channel, for a task owned by
    /// `owner`. `None` when no LLM provider is available.
    pub fn agent_for(&self, owner: TaskOwner) -> Option<FunctionCallAgent> {
        let provider = self.llm.default_provider()?;
        let model = self
            .config
            .llm
            .default_model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_owned());
        let queue = Arc::new(EventQueueRegistry::new(
            Arc::clone(&self.store),
            owner,
            self.config.runtime.clone(),
        ));
        let agent = FunctionCallAgent::new(provider, self.config.agent.clone(), Arc::clone(&self.tools), queue)
            .with_pricing(self.config.llm.pricing_for(&model))
            .with_model(model);
        Some(agent)
    }
}
