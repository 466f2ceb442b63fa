//! Folding a task's event stream into one [`AgentResult`].
//!
//! Events are grouped by id in first-seen order. MESSAGE and THINK groups
//! accumulate `thought`/`answer` across fragments; any other kind replaces.
//! PINGs are dropped on arrival. The fold reads no clocks, so folding the
//! same list twice gives the same result.

use std::collections::HashMap;

use uuid::Uuid;

use tl_domain::thought::{AgentResult, AgentStatus, AgentThought, QueueEvent};

#[derive(Debug, Default)]
pub struct ThoughtAggregator {
    query: String,
    image_urls: Vec<String>,
    thoughts: Vec<AgentThought>,
    index: HashMap<Uuid, usize>,
    answer: String,
    status: Option<AgentStatus>,
    error: String,
}

impl ThoughtAggregator {
    pub fn new(query: impl Into<String>, image_urls: Vec<String>) -> Self {
        Self { query: query.into(), image_urls, ..Default::default() }
    }

    pub fn push(&mut self, thought: AgentThought) {
        if thought.event == QueueEvent::Ping {
            return;
        }

        if let Some(status) = AgentStatus::from_event(thought.event) {
            if self.status.is_none() {
                self.status = Some(status);
                if status == AgentStatus::Error {
                    self.error = thought.observation.clone();
                }
            }
        }

        if thought.event == QueueEvent::Message {
            self.answer.push_str(&thought.answer);
        }

        match self.index.get(&thought.id) {
            Some(&i) if thought.event.is_accumulating() && self.thoughts[i].event == thought.event => {
                self.thoughts[i].absorb(thought);
            }
            Some(&i) => self.thoughts[i] = thought,
            None => {
                self.index.insert(thought.id, self.thoughts.len());
                self.thoughts.push(thought);
            }
        }
    }

    /// Status so far: the first STOP/TIMEOUT/ERROR seen, else normal.
    pub fn status(&self) -> AgentStatus {
        self.status.unwrap_or_default()
    }

    pub fn finish(self) -> AgentResult {
        let message = self
            .thoughts
            .iter()
            .find(|t| t.event == QueueEvent::Message)
            .map(|t| t.message.clone())
            .unwrap_or_default();
        let latency = self.thoughts.iter().map(|t| t.latency).sum();

        AgentResult {
            query: self.query,
            image_urls: self.image_urls,
            message,
            answer: self.answer,
            agent_thoughts: self.thoughts,
            latency,
            status: self.status.unwrap_or_default(),
            error: self.error,
        }
    }
}

/// Fold a complete event list.
pub fn fold(query: &str, image_urls: &[String], thoughts: &[AgentThought]) -> AgentResult {
    let mut aggregator = ThoughtAggregator::new(query, image_urls.to_vec());
    for thought in thoughts {
        aggregator.push(thought.clone());
    }
    aggregator.finish()
}
