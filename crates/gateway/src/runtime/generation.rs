//! Classification of one streamed model response.
//!
//! A response starts as whatever its first meaningful chunk looks like and
//! may upgrade exactly three ways: `think -> message`, `think -> thought`
//! and `message -> thought`. Each upgrade opens a new segment (fresh event
//! id, timer restarted). Nothing ever downgrades.

use tokio::time::Instant;
use uuid::Uuid;

use tl_domain::stream::StreamEvent;
use tl_domain::thought::QueueEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationType {
    /// Reasoning-channel text.
    Think,
    /// A tool-call request.
    Thought,
    /// Answer text.
    Message,
}

impl GenerationType {
    /// Event kind used for the streamed chunks of this type, if any.
    pub fn chunk_event(self) -> Option<QueueEvent> {
        match self {
            GenerationType::Think => Some(QueueEvent::Think),
            GenerationType::Message => Some(QueueEvent::Message),
            GenerationType::Thought => None,
        }
    }
}

/// Shape of one provider chunk as far as classification cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkShape {
    Content,
    Reasoning,
    ToolCall,
}

impl ChunkShape {
    /// `None` for chunks that carry no generation (usage, done, errors).
    pub fn of(event: &StreamEvent) -> Option<Self> {
        match event {
            StreamEvent::Token { text } if !text.is_empty() => Some(ChunkShape::Content),
            StreamEvent::Thinking { text } if !text.is_empty() => Some(ChunkShape::Reasoning),
            e if e.is_tool_call() => Some(ChunkShape::ToolCall),
            _ => None,
        }
    }
}

/// The segment currently being streamed.
#[derive(Debug)]
pub struct Segment {
    kind: Option<GenerationType>,
    id: Uuid,
    started: Instant,
}

impl Default for Segment {
    fn default() -> Self {
        Self::new()
    }
}

impl Segment {
    pub fn new() -> Self {
        Self { kind: None, id: Uuid::new_v4(), started: Instant::now() }
    }

    pub fn kind(&self) -> Option<GenerationType> {
        self.kind
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Seconds since the segment opened.
    pub fn latency(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Feed one chunk and return the type after any transition.
    pub fn observe(&mut self, shape: ChunkShape) -> GenerationType {
        use ChunkShape as C;
        use GenerationType as G;

        let next = match (self.kind, shape) {
            (None, C::ToolCall) => G::Thought,
            (None, C::Content) => G::Message,
            (None, C::Reasoning) => G::Think,
            (Some(G::Think), C::Content) => G::Message,
            (Some(G::Think), C::ToolCall) | (Some(G::Message), C::ToolCall) => G::Thought,
            (Some(current), _) => current,
        };

        if self.kind.is_some_and(|current| current != next) {
            self.id = Uuid::new_v4();
            self.started = Instant::now();
        }
        self.kind = Some(next);
        next
    }
}
