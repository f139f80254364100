//! Push channel: best-effort topic fan-out
//!
//! Events are published to three kinds of topic:
//! - `Session(id)`: widgets and agent consoles watching one conversation;
//! - `Agents`: dashboards tracking waiting/active badges;
//! - `Global`: fallback for sockets that have not joined a session yet.
//!
//! Publishing never blocks and never fails. A topic with no subscribers drops
//! the event. Consumers treat events as hints to poll sooner.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use tokio::sync::broadcast;
use uuid::Uuid;

use handoff_core::wire::{PushEvent, WireMessage};
use handoff_core::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Session(Uuid),
    Agents,
    Global,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Session(id) => write!(f, "session:{}", id),
            Topic::Agents => f.write_str("agents"),
            Topic::Global => f.write_str("global"),
        }
    }
}

/// Injected pub/sub handle. Request handlers receive one explicitly so tests
/// can substitute a recorder.
pub trait PushChannel: Send + Sync {
    fn publish(&self, topic: Topic, event: PushEvent);

    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<PushEvent>;

    /// A new message goes to its session, the agents topic and the global fallback.
    fn message_received(&self, session_id: Uuid, message: WireMessage) {
        let event = PushEvent::MessageReceived { session_id, message };
        for topic in [Topic::Session(session_id), Topic::Agents, Topic::Global] {
            self.publish(topic, event.clone());
        }
    }

    fn session_updated(&self, session: &Session, last_message: Option<WireMessage>) {
        let event = PushEvent::SessionUpdated {
            session_id: session.id,
            status: session.status,
            last_message,
            updated_at: session.updated_at,
        };
        for topic in [Topic::Session(session.id), Topic::Agents, Topic::Global] {
            self.publish(topic, event.clone());
        }
    }

    /// Typing hints are relayed, never stored, and skip the global topic.
    fn customer_typing(&self, session_id: Uuid, is_typing: bool) {
        let event = PushEvent::CustomerTyping { session_id, is_typing };
        self.publish(Topic::Session(session_id), event.clone());
        self.publish(Topic::Agents, event);
    }
}

/// `tokio::sync::broadcast` channel per topic, created lazily on first subscribe.
pub struct BroadcastHub {
    capacity: usize,
    topics: Mutex<HashMap<Topic, broadcast::Sender<PushEvent>>>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Live subscriber count for a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        match self.topics.lock() {
            Ok(topics) => topics.get(&topic).map_or(0, |tx| tx.receiver_count()),
            Err(_) => 0,
        }
    }
}

impl PushChannel for BroadcastHub {
    fn publish(&self, topic: Topic, event: PushEvent) {
        let mut topics = match self.topics.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = topics.get(&topic) else {
            return;
        };
        if tx.send(event).is_err() {
            // Every receiver is gone; forget per-session topics.
            if matches!(topic, Topic::Session(_)) {
                topics.remove(&topic);
            }
            tracing::trace!(topic = %topic, "Push dropped: no subscribers");
        }
    }

    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<PushEvent> {
        let mut topics = match self.topics.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

/// Records every publish. Used in tests in place of the hub.
#[derive(Default)]
pub struct RecordingPush {
    events: Mutex<Vec<(Topic, PushEvent)>>,
}

impl RecordingPush {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(Topic, PushEvent)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn events_for(&self, topic: Topic) -> Vec<PushEvent> {
        self.events()
            .into_iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, e)| e)
            .collect()
    }
}

impl PushChannel for RecordingPush {
    fn publish(&self, topic: Topic, event: PushEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push((topic, event));
        }
    }

    fn subscribe(&self, _topic: Topic) -> broadcast::Receiver<PushEvent> {
        broadcast::channel(1).1
    }
}
