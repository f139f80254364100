//! Message log: at-most-once append and cursor reads
//!
//! Write path, in order:
//! 1. `clientMessageId` already stored for the session → existing message;
//! 2. no id: identical `(role, content)` within the duplicate window → existing
//!    message (legacy heuristic);
//! 3. insert; a unique-index conflict from a racing writer also resolves to the
//!    stored message.
//!
//! The store stamps each insert strictly after the session's newest message,
//! so a cursor never skips a row committed later.
//!
//! Read path: `fetch_since(cursor)` returns `timestamp > cursor` ascending. With
//! no cursor, the recent window (`sync.initial_window_secs`, newest
//! `sync.initial_history_limit`).

use std::sync::Arc;

use uuid::Uuid;

use handoff_core::config::SyncConfig;
use handoff_core::error::{HandoffError, Result};
use handoff_core::models::category;
use handoff_core::store::InsertResult;
use handoff_core::{ChatStore, Clock, Message, Role, SyntheticMarker};

/// Result of an append. `Duplicate` is the normal path for a retried write.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Created(Message),
    Duplicate(Message),
}

impl AppendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            AppendOutcome::Created(m) | AppendOutcome::Duplicate(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            AppendOutcome::Created(m) | AppendOutcome::Duplicate(m) => m,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppendOutcome::Duplicate(_))
    }
}

impl From<InsertResult> for AppendOutcome {
    fn from(r: InsertResult) -> Self {
        match r {
            InsertResult::Inserted(m) => AppendOutcome::Created(m),
            InsertResult::Conflict(m) => AppendOutcome::Duplicate(m),
        }
    }
}

/// A message about to be written.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub category: String,
    pub client_message_id: Option<String>,
    /// Caller-supplied timestamp (imported history); `None` means now. Either
    /// way the store may move it forward past the newest stored message.
    pub timestamp: Option<i64>,
}

impl NewMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            category: category::TEXT.to_string(),
            client_message_id: None,
            timestamp: None,
        }
    }

    pub fn client_message_id(mut self, id: Option<String>) -> Self {
        self.client_message_id = id.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn at(mut self, timestamp: Option<i64>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Clone)]
pub struct ChatLog {
    store: Arc<dyn ChatStore>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl ChatLog {
    pub fn new(store: Arc<dyn ChatStore>, clock: Arc<dyn Clock>, config: SyncConfig) -> Self {
        Self { store, clock, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn append(&self, session_id: Uuid, new: NewMessage) -> Result<AppendOutcome> {
        let content = new.content.trim();
        if content.is_empty() {
            return Err(HandoffError::validation("content is required"));
        }
        let now = self.clock.now_millis();

        match new.client_message_id.as_deref() {
            Some(cmid) => {
                if let Some(existing) = self.store.find_by_client_message_id(session_id, cmid).await? {
                    tracing::debug!(
                        session_id = %session_id,
                        client_message_id = cmid,
                        message_id = %existing.id,
                        "Duplicate suppressed by client message id"
                    );
                    return Ok(AppendOutcome::Duplicate(existing));
                }
            }
            None if self.config.require_client_message_id && new.role != Role::System => {
                return Err(HandoffError::validation("clientMessageId is required"));
            }
            None => {
                let since = now - self.config.duplicate_window_ms();
                if let Some(existing) = self
                    .store
                    .find_recent_identical(session_id, new.role, content, since)
                    .await?
                {
                    tracing::debug!(
                        session_id = %session_id,
                        message_id = %existing.id,
                        "Duplicate suppressed by content window (legacy client)"
                    );
                    return Ok(AppendOutcome::Duplicate(existing));
                }
            }
        }

        let message = Message::new(session_id, new.role, content, new.timestamp.unwrap_or(now))
            .with_category(new.category)
            .with_client_message_id(new.client_message_id);

        let outcome = AppendOutcome::from(self.store.insert_message(&message).await?);
        match &outcome {
            AppendOutcome::Created(m) => {
                self.store.touch_session(session_id, m.timestamp.max(now)).await?;
            }
            AppendOutcome::Duplicate(m) => {
                tracing::debug!(session_id = %session_id, message_id = %m.id, "Lost insert race; returning stored message");
            }
        }
        Ok(outcome)
    }

    /// Create the synthetic message for `marker` unless one exists. Safe under
    /// any number of concurrent callers: the store's unique marker index
    /// admits exactly one row. `timestamp` is a floor, not the final stamp.
    pub async fn ensure_marker(
        &self,
        session_id: Uuid,
        marker: SyntheticMarker,
        content: &str,
        timestamp: i64,
    ) -> Result<AppendOutcome> {
        if let Some(existing) = self.store.find_marker(session_id, marker).await? {
            return Ok(AppendOutcome::Duplicate(existing));
        }
        let message = Message::synthetic(session_id, marker, content, timestamp);
        let outcome = AppendOutcome::from(self.store.insert_message(&message).await?);
        if let AppendOutcome::Created(m) = &outcome {
            tracing::debug!(session_id = %session_id, marker = marker.as_str(), message_id = %m.id, "Synthetic message created");
            self.store
                .touch_session(session_id, self.clock.now_millis().max(m.timestamp))
                .await?;
        }
        Ok(outcome)
    }

    pub async fn fetch_since(&self, session_id: Uuid, cursor: Option<i64>) -> Result<Vec<Message>> {
        match cursor {
            Some(cursor) => self.store.messages_after(session_id, cursor).await,
            None => {
                let since = self.clock.now_millis() - self.config.initial_window_ms();
                self.store
                    .recent_messages(session_id, since, self.config.initial_history_limit)
                    .await
            }
        }
    }
}
