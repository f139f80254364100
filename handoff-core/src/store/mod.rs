//! Session store + message log persistence.
//!
//! The message log is append-only: implementations expose no update or delete
//! for messages. Two uniqueness rules are enforced at insert time and reported
//! as [`InsertResult::Conflict`] rather than as errors:
//! - one message per `(session_id, client_message_id)`;
//! - one message per `(session_id, marker)` for synthetic messages.
//!
//! Timestamps are strictly increasing per session in commit order: the store
//! stamps each insert with `max(requested, latest + 1)` while holding the
//! session's write lock. A reader that saw a row at `t` can never later find
//! an uncommitted row at or below `t`, so `messages_after(cursor)` has no gaps.
//!
//! Session status only moves through [`ChatStore::transition_session`], a
//! compare-and-set on the current status.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{Message, Role, Session, SessionStatus, SyntheticMarker};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome of a guarded insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertResult {
    Inserted(Message),
    /// A uniqueness rule matched; carries the message already stored.
    Conflict(Message),
}

impl InsertResult {
    pub fn into_message(self) -> Message {
        match self {
            InsertResult::Inserted(m) | InsertResult::Conflict(m) => m,
        }
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, InsertResult::Inserted(_))
    }
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<()>;

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>>;

    /// Sessions filtered by status, most recently updated first.
    async fn list_sessions(&self, status: Option<SessionStatus>, limit: u32) -> Result<Vec<Session>>;

    /// Write status, agent, metadata and `updated_at` only while the stored
    /// status is still `from`. `Ok(false)` means another writer moved the
    /// session first; unknown sessions are `NotFound`.
    async fn transition_session(&self, session: &Session, from: SessionStatus) -> Result<bool>;

    /// Advance `updated_at` to `at` if it is later.
    async fn touch_session(&self, id: Uuid, at: i64) -> Result<()>;

    /// Number of `waiting` sessions created at or before `created_at`.
    async fn waiting_ahead(&self, created_at: i64) -> Result<u32>;

    /// `waiting` sessions whose `updated_at` is older than `before`.
    async fn stale_waiting(&self, before: i64) -> Result<Vec<Session>>;

    /// Append `message`. Its timestamp is a floor: the stored row gets
    /// `max(message.timestamp, latest + 1)`, and `Inserted` carries it.
    async fn insert_message(&self, message: &Message) -> Result<InsertResult>;

    async fn find_by_client_message_id(
        &self,
        session_id: Uuid,
        client_message_id: &str,
    ) -> Result<Option<Message>>;

    /// Most recent `(role, content)` match with `timestamp >= since`.
    async fn find_recent_identical(
        &self,
        session_id: Uuid,
        role: Role,
        content: &str,
        since: i64,
    ) -> Result<Option<Message>>;

    async fn find_marker(&self, session_id: Uuid, marker: SyntheticMarker) -> Result<Option<Message>>;

    /// Messages with `timestamp > after`, ascending by `(timestamp, id)`.
    async fn messages_after(&self, session_id: Uuid, after: i64) -> Result<Vec<Message>>;

    /// The newest `limit` messages with `timestamp >= since`, ascending.
    async fn recent_messages(&self, session_id: Uuid, since: i64, limit: u32) -> Result<Vec<Message>>;

    /// Backend description for health checks.
    async fn ping(&self) -> Result<String>;
}

/// Build the store selected by `database.url`.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn ChatStore>> {
    if config.is_memory() {
        tracing::info!("Using in-memory chat store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = crate::db::create_pool(config).await?;
    crate::db::ensure_schema(&pool).await?;
    tracing::info!("Connected to Postgres chat store");
    Ok(Arc::new(PgStore::new(pool)))
}
