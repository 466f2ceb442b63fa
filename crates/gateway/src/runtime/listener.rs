//! Consumer side of a task channel.
//!
//! The listener never blocks longer than one poll interval. Between reads
//! it injects keep-alive PINGs, enforces the overall timeout and checks the
//! shared stop flag. Timeout and stop are published into the channel like
//! any other terminal event, so the stream always ends on the sentinel.

use std::sync::Arc;

use tokio::time::Instant;
use uuid::Uuid;

use tl_domain::stream::BoxStream;
use tl_domain::thought::{AgentThought, QueueEvent};

use super::queue::{EventQueueRegistry, Recv};

/// Frees the task channel however the stream ends, including the consumer
/// dropping it early.
struct ReleaseOnDrop {
    queue: Arc<EventQueueRegistry>,
    task_id: Uuid,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.queue.release(self.task_id);
    }
}

/// Aborts the task producing a channel's events once nobody listens.
pub struct WorkerGuard(tokio::task::AbortHandle);

impl WorkerGuard {
    pub fn new(handle: tokio::task::AbortHandle) -> Self {
        Self(handle)
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Stream every event of `task_id` up to and including its terminal event.
///
/// `worker` is aborted when the stream ends or is dropped, before the
/// channel is released.
pub fn listen(
    queue: Arc<EventQueueRegistry>,
    task_id: Uuid,
    worker: Option<WorkerGuard>,
) -> BoxStream<'static, AgentThought> {
    let config = queue.config().clone();
    let poll_interval = config.poll_interval();
    let ping_every = config.ping_interval_secs.max(1);
    let timeout = config.listen_timeout();

    Box::pin(async_stream::stream! {
        let channel = queue.channel_for(task_id).await;
        let _release = ReleaseOnDrop { queue: Arc::clone(&queue), task_id };
        let _worker = worker;
        let started = Instant::now();
        let mut last_ping_tick = 0u64;
        let mut closing = false;

        loop {
            match channel.recv_timeout(poll_interval).await {
                Recv::Thought(thought) => yield thought,
                Recv::End => break,
                Recv::Empty => {}
            }

            // A terminal event is already queued; just drain up to it.
            if closing {
                continue;
            }

            let elapsed = started.elapsed();
            let tick = elapsed.as_secs() / ping_every;
            if tick > last_ping_tick {
                last_ping_tick = tick;
                queue.publish(task_id, AgentThought::new(task_id, QueueEvent::Ping)).await;
            }

            if elapsed >= timeout {
                tracing::warn!(%task_id, elapsed_secs = elapsed.as_secs(), "task timed out");
                queue.publish(task_id, AgentThought::new(task_id, QueueEvent::Timeout)).await;
                closing = true;
            } else if queue.is_stopped(task_id).await {
                tracing::info!(%task_id, "task stopped by request");
                queue.publish(task_id, AgentThought::new(task_id, QueueEvent::Stop)).await;
                closing = true;
            }
        }

        tracing::debug!(%task_id, elapsed_ms = started.elapsed().as_millis() as u64, "listener finished");
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
