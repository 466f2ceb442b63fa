mod agent;
mod llm;
mod observability;
mod runtime;
mod server;

pub use agent::*;
pub use llm::*;
pub use observability::*;
pub use runtime::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub runtime: StreamConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Error, field: field.into(), message: message.into() }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Warning, field: field.into(), message: message.into() }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.max_concurrent_requests == 0 {
            errors.push(ConfigError::error(
                "server.max_concurrent_requests",
                "must allow at least one request",
            ));
        }
        if self.server.cors.is_wildcard() {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        if self.llm.providers.is_empty() {
            errors.push(ConfigError::warning("llm.providers", "no LLM providers configured"));
        }
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError::error(
                    format!("llm.providers[{i}].id"),
                    "provider id must not be empty",
                ));
            }
            if provider.base_url.is_empty() {
                errors.push(ConfigError::error(
                    format!("llm.providers[{i}].base_url"),
                    "provider base_url must not be empty",
                ));
            }
        }
        if let Some(default) = &self.llm.default_provider {
            if !self.llm.providers.iter().any(|p| &p.id == default) {
                errors.push(ConfigError::error(
                    "llm.default_provider",
                    format!("no provider with id \"{default}\""),
                ));
            }
        }

        let review = &self.agent.review;
        if review.inputs_enabled() && review.inputs.preset_response.trim().is_empty() {
            errors.push(ConfigError::warning(
                "agent.review.inputs.preset_response",
                "input moderation is enabled but the preset response is empty",
            ));
        }
        if review.enable && review.keywords.iter().all(|k| k.is_empty()) {
            errors.push(ConfigError::warning(
                "agent.review.keywords",
                "moderation is enabled without any keywords",
            ));
        }
        if self.agent.dialog_round == 0 {
            errors.push(ConfigError::warning(
                "agent.dialog_round",
                "0 rounds drops all conversation history",
            ));
        }

        if self.runtime.poll_interval_ms == 0 {
            errors.push(ConfigError::error("runtime.poll_interval_ms", "must be greater than 0"));
        }
        if self.runtime.ping_interval_secs == 0 {
            errors.push(ConfigError::error("runtime.ping_interval_secs", "must be greater than 0"));
        }
        if self.runtime.listen_timeout_secs == 0 {
            errors.push(ConfigError::error("runtime.listen_timeout_secs", "must be greater than 0"));
        }
        if self.runtime.task_stopped_ttl_secs == 0 || self.runtime.task_owner_ttl_secs == 0 {
            errors.push(ConfigError::error(
                "runtime",
                "cancellation key TTLs must be greater than 0",
            ));
        }

        let obs = &self.observability;
        if !obs.sample_rate_in_range() {
            errors.push(ConfigError::warning(
                "observability.sample_rate",
                format!("{} is outside 0.0..=1.0 and will be clamped to {}", obs.sample_rate, obs.sampler_ratio()),
            ));
        }
        if obs.log_filter.trim().is_empty() {
            errors.push(ConfigError::warning(
                "observability.log_filter",
                "empty filter; only errors will be logged when RUST_LOG is unset",
            ));
        }

        errors
    }

    pub fn has_errors(&self) -> bool {
        self.validate().iter().any(|e| e.severity == ConfigSeverity::Error)
    }
}
