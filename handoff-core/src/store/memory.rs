//! In-process [`ChatStore`] with the same uniqueness rules as the Postgres schema.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ChatStore, InsertResult};
use crate::error::{HandoffError, Result};
use crate::models::{Message, Role, Session, SessionStatus, SyntheticMarker};

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    /// Per-session log; strictly increasing timestamps, so append order is
    /// `(timestamp, id)` order.
    messages: HashMap<Uuid, Vec<Message>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored messages for a session, used by tests.
    pub async fn message_count(&self, session_id: Uuid) -> usize {
        let inner = self.inner.lock().await;
        inner.messages.get(&session_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.sessions.contains_key(&session.id) {
            return Err(HandoffError::Other(format!("Session {} already exists", session.id)));
        }
        inner.sessions.insert(session.id, session.clone());
        inner.messages.entry(session.id).or_default();
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.inner.lock().await.sessions.get(&id).cloned())
    }

    async fn list_sessions(&self, status: Option<SessionStatus>, limit: u32) -> Result<Vec<Session>> {
        let inner = self.inner.lock().await;
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        sessions.truncate(limit as usize);
        Ok(sessions)
    }

    async fn transition_session(&self, session: &Session, from: SessionStatus) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| HandoffError::session_not_found(session.id))?;
        if stored.status != from {
            return Ok(false);
        }
        stored.status = session.status;
        stored.agent_id = session.agent_id.clone();
        stored.metadata = session.metadata.clone();
        stored.touch(session.updated_at);
        Ok(true)
    }

    async fn touch_session(&self, id: Uuid, at: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(&id) {
            Some(stored) => {
                stored.touch(at);
                Ok(())
            }
            None => Err(HandoffError::session_not_found(id)),
        }
    }

    async fn waiting_ahead(&self, created_at: i64) -> Result<u32> {
        let inner = self.inner.lock().await;
        let count = inner
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Waiting && s.created_at <= created_at)
            .count();
        Ok(count as u32)
    }

    async fn stale_waiting(&self, before: i64) -> Result<Vec<Session>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Waiting && s.updated_at < before)
            .cloned()
            .collect())
    }

    async fn insert_message(&self, message: &Message) -> Result<InsertResult> {
        let mut inner = self.inner.lock().await;
        if !inner.sessions.contains_key(&message.session_id) {
            return Err(HandoffError::session_not_found(message.session_id));
        }
        let log = inner.messages.entry(message.session_id).or_default();

        let conflict = log.iter().find(|m| {
            let same_client_id = message.client_message_id.is_some()
                && m.client_message_id == message.client_message_id;
            let same_marker = message.marker.is_some() && m.marker == message.marker;
            same_client_id || same_marker
        });
        if let Some(existing) = conflict {
            return Ok(InsertResult::Conflict(existing.clone()));
        }

        let mut stored = message.clone();
        if let Some(last) = log.last() {
            stored.timestamp = stored.timestamp.max(last.timestamp + 1);
        }
        log.push(stored.clone());
        Ok(InsertResult::Inserted(stored))
    }

    async fn find_by_client_message_id(
        &self,
        session_id: Uuid,
        client_message_id: &str,
    ) -> Result<Option<Message>> {
        let inner = self.inner.lock().await;
        Ok(inner.messages.get(&session_id).and_then(|log| {
            log.iter()
                .find(|m| m.client_message_id.as_deref() == Some(client_message_id))
                .cloned()
        }))
    }

    async fn find_recent_identical(
        &self,
        session_id: Uuid,
        role: Role,
        content: &str,
        since: i64,
    ) -> Result<Option<Message>> {
        let inner = self.inner.lock().await;
        Ok(inner.messages.get(&session_id).and_then(|log| {
            log.iter()
                .rev()
                .find(|m| m.role == role && m.content == content && m.timestamp >= since)
                .cloned()
        }))
    }

    async fn find_marker(&self, session_id: Uuid, marker: SyntheticMarker) -> Result<Option<Message>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .get(&session_id)
            .and_then(|log| log.iter().find(|m| m.marker == Some(marker)).cloned()))
    }

    async fn messages_after(&self, session_id: Uuid, after: i64) -> Result<Vec<Message>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .get(&session_id)
            .map(|log| log.iter().filter(|m| m.timestamp > after).cloned().collect())
            .unwrap_or_default())
    }

    async fn recent_messages(&self, session_id: Uuid, since: i64, limit: u32) -> Result<Vec<Message>> {
        let inner = self.inner.lock().await;
        let window: Vec<Message> = inner
            .messages
            .get(&session_id)
            .map(|log| log.iter().filter(|m| m.timestamp >= since).cloned().collect())
            .unwrap_or_default();
        let skip = window.len().saturating_sub(limit as usize);
        Ok(window.into_iter().skip(skip).collect())
    }

    async fn ping(&self) -> Result<String> {
        Ok("memory".to_string())
    }
}
