//! Agent execution runtime.
//!
//! A task runs [`FunctionCallAgent`] on a spawned worker that publishes
//! [`AgentThought`]s into a per-task channel owned by
//! [`EventQueueRegistry`]. The caller drains that channel with [`listen`]
//! (keep-alive, timeout and stop detection included) and may fold the
//! events into an [`AgentResult`] with [`ThoughtAggregator`].
//!
//! [`AgentThought`]: tl_domain::thought::AgentThought
//! [`AgentResult`]: tl_domain::thought::AgentResult

pub mod agent;
pub mod aggregate;
pub mod generation;
pub mod history;
pub mod listener;
pub mod queue;
pub mod review;
pub mod store;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{AgentState, FunctionCallAgent, MAX_ITERATION_RESPONSE};
pub use aggregate::{fold, ThoughtAggregator};
pub use listener::{listen, WorkerGuard};
pub use queue::EventQueueRegistry;
pub use store::{KvStore, MemoryKvStore};
pub use tl_domain::thought::TaskOwner;
