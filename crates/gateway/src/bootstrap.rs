//! AppState construction shared by `serve` and `run`.

use std::sync::Arc;

use tl_domain::config::{Config, ConfigSeverity};
use tl_providers::registry::ProviderRegistry;
use tl_tools::ToolProviderRegistry;

use crate::runtime::MemoryKvStore;
use crate::state::AppState;

/// Validate config, initialize providers and tools and return a wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let error_count = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if error_count > 0 {
        anyhow::bail!("config validation failed with {error_count} error(s)");
    }

    // ── LLM providers ────────────────────────────────────────────────
    let llm = Arc::new(ProviderRegistry::from_config(&config.llm));
    if llm.is_empty() {
        tracing::warn!("no LLM providers available; chats will be rejected");
    } else {
        tracing::info!(providers = ?llm.list_providers(), "LLM providers ready");
    }

    // ── Tools ────────────────────────────────────────────────────────
    let tools = Arc::new(ToolProviderRegistry::with_builtins().build_toolset(&config.agent.tools));
    tracing::info!(tools_count = tools.len(), "agent tools ready");

    // ── Task store ───────────────────────────────────────────────────
    let store = Arc::new(MemoryKvStore::new());

    Ok(AppState { config, llm, store, tools })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_boots_without_providers() {
        let state = build_app_state(Arc::new(Config::default())).unwrap();
        assert!(state.llm.is_empty());
        assert!(state.tools.is_empty());
    }

    #[test]
    fn config_errors_refuse_to_boot() {
        let mut config = Config::default();
        config.runtime.poll_interval_ms = 0;
        let err = build_app_state(Arc::new(config)).err().unwrap();
        assert!(err.to_string().contains("1 error(s)"));
    }
}
