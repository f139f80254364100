//! Dedup/merge engine
//!
//! Shared by both sides of the sync protocol:
//! - the server's write path uses [`is_content_duplicate`] as the legacy
//!   fallback when a write carries no `clientMessageId`;
//! - clients use [`MessageLog`] to merge push and poll deliveries into one
//!   ordered view keyed by [`DedupKey`].
//!
//! The local view always converges to the server's `(timestamp, id)` order:
//! poll results replace whatever push or optimistic copy preceded them.

use std::cmp::Ordering;
use uuid::Uuid;

use crate::models::{Message, Role};
use crate::wire::WireMessage;

// ============================================================================
// Server-side duplicate detection
// ============================================================================

/// True when `existing` is a retry of a write of `(role, content)` made at `now`.
pub fn is_content_duplicate(
    existing: &Message,
    role: Role,
    content: &str,
    now: i64,
    window_ms: i64,
) -> bool {
    existing.role == role
        && existing.content == content
        && existing.timestamp <= now
        && now - existing.timestamp <= window_ms
}

// ============================================================================
// Client-side merge
// ============================================================================

/// Composite identity of a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Id(Uuid),
    Composite {
        role: Role,
        content: String,
        timestamp: i64,
    },
}

impl DedupKey {
    pub fn of(message: &WireMessage) -> Self {
        match message.id {
            Some(id) => DedupKey::Id(id),
            None => DedupKey::Composite {
                role: message.role,
                content: message.content.clone(),
                timestamp: message.timestamp,
            },
        }
    }

    /// Two deliveries are the same message if either identity matches. The
    /// composite check lets an id-less delivery collapse onto a stored copy.
    pub fn matches(&self, message: &WireMessage) -> bool {
        match self {
            DedupKey::Id(id) => message.id == Some(*id),
            DedupKey::Composite {
                role,
                content,
                timestamp,
            } => message.role == *role && message.content == *content && message.timestamp == *timestamp,
        }
    }
}

/// How a local entry got into the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Authoritative: came back from a pull or a send response.
    Poll,
    /// Rendered from a push hint; awaiting confirmation by a poll.
    Push,
    /// Local echo of a message we sent; awaiting the server copy.
    Optimistic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalMessage {
    pub message: WireMessage,
    pub origin: Origin,
}

impl LocalMessage {
    pub fn is_confirmed(&self) -> bool {
        self.origin == Origin::Poll
    }
}

/// Counters describing one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub replaced: usize,
    pub ignored: usize,
}

/// Ordered, deduplicated local view of a conversation.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Vec<LocalMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LocalMessage] {
        &self.entries
    }

    pub fn messages(&self) -> Vec<WireMessage> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Merge authoritative messages (poll or send response). They replace any
    /// push-rendered or optimistic copy of the same message.
    pub fn merge_authoritative<I>(&mut self, incoming: I) -> MergeReport
    where
        I: IntoIterator<Item = WireMessage>,
    {
        self.merge(incoming, Origin::Poll)
    }

    /// Merge push deliveries. Known messages are left alone.
    pub fn merge_push<I>(&mut self, incoming: I) -> MergeReport
    where
        I: IntoIterator<Item = WireMessage>,
    {
        self.merge(incoming, Origin::Push)
    }

    /// Show a message we have sent but the server has not yet confirmed.
    pub fn push_optimistic(&mut self, message: WireMessage) {
        self.entries.push(LocalMessage {
            message,
            origin: Origin::Optimistic,
        });
        self.sort();
    }

    /// Drop an optimistic echo whose send failed for good.
    pub fn discard_optimistic(&mut self, client_message_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| {
            !(e.origin == Origin::Optimistic
                && e.message.client_message_id.as_deref() == Some(client_message_id))
        });
        before != self.entries.len()
    }

    fn merge<I>(&mut self, incoming: I, origin: Origin) -> MergeReport
    where
        I: IntoIterator<Item = WireMessage>,
    {
        let mut report = MergeReport::default();

        for message in incoming {
            match self.position_of(&message) {
                Some(idx) => {
                    let entry = &mut self.entries[idx];
                    if origin == Origin::Poll && entry.origin != Origin::Poll {
                        entry.message = message;
                        entry.origin = Origin::Poll;
                        report.replaced += 1;
                    } else if origin == Origin::Poll && entry.message != message {
                        // Same identity, newer authoritative fields.
                        entry.message = message;
                        report.replaced += 1;
                    } else {
                        report.ignored += 1;
                    }
                }
                None => {
                    self.entries.push(LocalMessage { message, origin });
                    report.added += 1;
                }
            }
        }

        if report.added > 0 || report.replaced > 0 {
            self.sort();
        }
        report
    }

    fn position_of(&self, message: &WireMessage) -> Option<usize> {
        let key = DedupKey::of(message);
        // Optimistic echoes have no id yet; reconcile them by client id.
        if let Some(cmid) = message.client_message_id.as_deref() {
            if let Some(idx) = self.entries.iter().position(|e| {
                e.origin == Origin::Optimistic && e.message.client_message_id.as_deref() == Some(cmid)
            }) {
                return Some(idx);
            }
        }
        self.entries
            .iter()
            .position(|e| key.matches(&e.message) || DedupKey::of(&e.message).matches(message))
    }

    fn sort(&mut self) {
        self.entries.sort_by(|a, b| canonical_order(&a.message, &b.message));
    }
}

/// `(timestamp, id)` order; id-less messages sort before identified ones at
/// the same instant, then by content for determinism.
pub fn canonical_order(a: &WireMessage, b: &WireMessage) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.content.cmp(&b.content))
}

/// Cursor never moves backwards.
pub fn advance_cursor<'a, I>(current: Option<i64>, messages: I) -> Option<i64>
where
    I: IntoIterator<Item = &'a WireMessage>,
{
    messages
        .into_iter()
        .map(|m| m.timestamp)
        .fold(current, |acc, ts| Some(acc.map_or(ts, |c| c.max(ts))))
}
