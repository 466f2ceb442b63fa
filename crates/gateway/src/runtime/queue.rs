//! Per-task event channels and ownership-checked cancellation.
//!
//! Each task gets an unbounded FIFO created on first use. Publishing a
//! terminal event pushes the end-of-stream sentinel right behind it, under
//! the same lock, so nothing can land between the two.
//!
//! Cancellation goes through the shared store only: the owner marker is
//! written when the channel is created, and a stop request from any process
//! sets the stopped marker if (and only if) the requester matches it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use tl_domain::config::StreamConfig;
use tl_domain::thought::{AgentThought, QueueEvent, TaskOwner};

use super::store::KvStore;

fn belong_key(task_id: Uuid) -> String {
    format!("task_belong:{task_id}")
}

fn stopped_key(task_id: Uuid) -> String {
    format!("task_stopped:{task_id}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TaskChannel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one bounded wait on a channel.
#[derive(Debug)]
pub enum Recv {
    Thought(AgentThought),
    /// The sentinel: nothing more will be delivered.
    End,
    /// Nothing arrived within the wait.
    Empty,
}

/// `None` in the queue is the end-of-stream sentinel.
pub struct TaskChannel {
    tx: Mutex<mpsc::UnboundedSender<Option<AgentThought>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Option<AgentThought>>>,
}

impl TaskChannel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx: Mutex::new(tx), rx: tokio::sync::Mutex::new(rx) }
    }

    fn push(&self, thought: AgentThought) {
        let terminal = thought.event.is_terminal();
        let tx = self.tx.lock();
        // The receiver lives in `self`, so sends cannot fail.
        let _ = tx.send(Some(thought));
        if terminal {
            let _ = tx.send(None);
        }
    }

    /// Wait at most `wait` for the next item.
    pub async fn recv_timeout(&self, wait: Duration) -> Recv {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(Some(thought))) => Recv::Thought(thought),
            Ok(Some(None)) | Ok(None) => Recv::End,
            Err(_) => Recv::Empty,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventQueueRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Channels {
    live: HashMap<Uuid, Arc<TaskChannel>>,
    /// Tasks whose channel was released. `publish` never reopens these.
    released: HashSet<Uuid>,
}

impl Channels {
    /// The live channel, and whether it was just created.
    fn open(&mut self, task_id: Uuid) -> (Arc<TaskChannel>, bool) {
        match self.live.get(&task_id) {
            Some(channel) => (Arc::clone(channel), false),
            None => {
                let channel = Arc::new(TaskChannel::new());
                self.live.insert(task_id, Arc::clone(&channel));
                (channel, true)
            }
        }
    }
}

/// Channels for the tasks of one invoker.
///
/// Store failures never reach callers: they are logged, marker writes are
/// skipped, and `is_stopped` reports `false`.
pub struct EventQueueRegistry {
    channels: Mutex<Channels>,
    store: Arc<dyn KvStore>,
    owner: TaskOwner,
    config: StreamConfig,
}

impl EventQueueRegistry {
    pub fn new(store: Arc<dyn KvStore>, owner: TaskOwner, config: StreamConfig) -> Self {
        Self { channels: Mutex::default(), store, owner, config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn owner(&self) -> &TaskOwner {
        &self.owner
    }

    /// The channel for `task_id`, created (and the owner marker written) on
    /// first access. Reopens a released task.
    pub async fn channel_for(&self, task_id: Uuid) -> Arc<TaskChannel> {
        let (channel, created) = {
            let mut channels = self.channels.lock();
            channels.released.remove(&task_id);
            channels.open(task_id)
        };

        if created {
            self.write_owner_marker(task_id).await;
        }
        channel
    }

    async fn write_owner_marker(&self, task_id: Uuid) {
        let result = self
            .store
            .set_ex(&belong_key(task_id), &self.owner.cache_value(), self.config.task_owner_ttl())
            .await;
        if let Err(e) = result {
            tracing::warn!(%task_id, error = %e, "failed to write task owner marker");
        }
    }

    /// Events for a released task are dropped.
    pub async fn publish(&self, task_id: Uuid, thought: AgentThought) {
        tracing::trace!(%task_id, event = thought.event.as_str(), "publish");
        let (channel, created) = {
            let mut channels = self.channels.lock();
            if channels.released.contains(&task_id) {
                tracing::debug!(
                    %task_id,
                    event = thought.event.as_str(),
                    "dropping event for released task"
                );
                return;
            }
            channels.open(task_id)
        };
        if created {
            self.write_owner_marker(task_id).await;
        }
        channel.push(thought);
    }

    /// Publish an ERROR event carrying `error` as its observation.
    pub async fn publish_error(&self, task_id: Uuid, error: impl std::fmt::Display) {
        let mut thought = AgentThought::new(task_id, QueueEvent::Error);
        thought.observation = error.to_string();
        self.publish(task_id, thought).await;
    }

    pub async fn is_stopped(&self, task_id: Uuid) -> bool {
        match self.store.get(&stopped_key(task_id)).await {
            Ok(value) => value.is_some(),
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "stop flag lookup failed");
                false
            }
        }
    }

    /// Drop the channel for a finished task.
    pub fn release(&self, task_id: Uuid) {
        let mut channels = self.channels.lock();
        channels.live.remove(&task_id);
        channels.released.insert(task_id);
    }

    /// Ask the task to stop. Callable from any process sharing `store`.
    ///
    /// Silently does nothing when the task has no owner marker (unknown or
    /// expired) or when `requester` is not the owner.
    pub async fn request_stop(
        store: &dyn KvStore,
        task_id: Uuid,
        requester: &TaskOwner,
        config: &StreamConfig,
    ) {
        let owner = match store.get(&belong_key(task_id)).await {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                tracing::debug!(%task_id, "stop ignored: task has no owner marker");
                return;
            }
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "stop ignored: owner lookup failed");
                return;
            }
        };

        if owner != requester.cache_value() {
            tracing::debug!(%task_id, "stop ignored: requester does not own task");
            return;
        }

        if let Err(e) = store.set_ex(&stopped_key(task_id), "1", config.task_stopped_ttl()).await {
            tracing::warn!(%task_id, error = %e, "failed to write stop flag");
        } else {
            tracing::info!(%task_id, "stop requested");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
