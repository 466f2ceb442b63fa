//! `thoughtline run`: one-shot execution command.
//!
//! Runs a single task in-process, streams the answer to stdout, and exits.
//! Useful for scripting and for trying a config without the server.

use std::io::Write;
use std::sync::Arc;

use futures_util::StreamExt;

use tl_domain::config::Config;
use tl_domain::thought::{AgentStatus, InvokeFrom, QueueEvent, TaskOwner};

use crate::bootstrap;
use crate::runtime::{AgentState, ThoughtAggregator};

/// Execute a single task and print its events.
///
/// Returns the process exit code: 0 when the task ended normally.
pub async fn run(config: Arc<Config>, query: String, user: String, json_output: bool) -> anyhow::Result<i32> {
    let state = bootstrap::build_app_state(config)?;
    let agent = state
        .agent_for(TaskOwner::new(InvokeFrom::Debugger, user))
        .ok_or_else(|| anyhow::anyhow!("no LLM providers are available; check [[llm.providers]]"))?;

    let task = AgentState::new(query);
    let mut aggregator = ThoughtAggregator::new(task.query(), Vec::new());
    let mut events = agent.stream(task);
    let mut stdout = std::io::stdout();

    while let Some(thought) = events.next().await {
        if json_output {
            let line = serde_json::to_string(&thought)
                .map_err(|e| anyhow::anyhow!("serializing event: {e}"))?;
            writeln!(stdout, "{line}")?;
        } else {
            match thought.event {
                QueueEvent::Message => {
                    write!(stdout, "{}", thought.answer)?;
                    stdout.flush().ok();
                }
                QueueEvent::Think => {
                    // Dim output to stderr so it doesn't pollute stdout.
                    eprint!("\x1b[2m{}\x1b[0m", thought.thought);
                }
                QueueEvent::Action | QueueEvent::DatasetRetrieval => {
                    eprintln!("\x1b[2m[tool: {}]\x1b[0m", thought.tool);
                }
                _ => {}
            }
        }
        aggregator.push(thought);
    }

    let result = aggregator.finish();
    if !json_output {
        writeln!(stdout)?;
    }
    eprintln!("status: {:?}, latency: {:.2}s", result.status, result.latency);
    if result.status == AgentStatus::Error {
        eprintln!("error: {}", result.error);
    }

    Ok(if result.status == AgentStatus::Normal { 0 } else { 1 })
}
