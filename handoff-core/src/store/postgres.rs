//! Postgres-backed [`ChatStore`].
//!
//! Uniqueness of client ids and synthetic markers is enforced by partial
//! unique indexes (see `db::ensure_schema`); inserts use
//! `ON CONFLICT DO NOTHING` and read back the stored row on conflict.
//!
//! Inserts lock the session row (`FOR UPDATE`) and stamp the message after the
//! newest one inside that transaction, so per-session commits happen in
//! timestamp order.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{ChatStore, InsertResult};
use crate::error::{HandoffError, Result};
use crate::models::{Message, Role, Session, SessionStatus, SyntheticMarker};

const MESSAGE_COLUMNS: &str =
    "id, session_id, role, content, category, created_at, client_message_id, marker";

const SESSION_COLUMNS: &str =
    "id, customer_name, customer_email, status, agent_id, created_at, updated_at, metadata";

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    customer_name: String,
    customer_email: String,
    status: String,
    agent_id: Option<String>,
    created_at: i64,
    updated_at: i64,
    metadata: serde_json::Value,
}

impl TryFrom<SessionRow> for Session {
    type Error = HandoffError;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Session {
            id: row.id,
            customer_name: row.customer_name,
            customer_email: row.customer_email,
            status: row.status.parse()?,
            agent_id: row.agent_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            metadata: row.metadata,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    session_id: Uuid,
    role: String,
    content: String,
    category: String,
    created_at: i64,
    client_message_id: Option<String>,
    marker: Option<String>,
}

impl TryFrom<MessageRow> for Message {
    type Error = HandoffError;

    fn try_from(row: MessageRow) -> Result<Self> {
        let marker = match row.marker {
            Some(m) => Some(m.parse::<SyntheticMarker>()?),
            None => None,
        };
        Ok(Message {
            id: row.id,
            session_id: row.session_id,
            role: row.role.parse()?,
            content: row.content,
            category: row.category,
            timestamp: row.created_at,
            client_message_id: row.client_message_id,
            marker,
        })
    }
}

fn into_messages(rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    rows.into_iter().map(Message::try_from).collect()
}

fn into_sessions(rows: Vec<SessionRow>) -> Result<Vec<Session>> {
    rows.into_iter().map(Session::try_from).collect()
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for PgStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, customer_name, customer_email, status, agent_id, created_at, updated_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.id)
        .bind(&session.customer_name)
        .bind(&session.customer_email)
        .bind(session.status.as_str())
        .bind(&session.agent_id)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(&session.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {} FROM chat_sessions WHERE id = $1", SESSION_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Session::try_from).transpose()
    }

    async fn list_sessions(&self, status: Option<SessionStatus>, limit: u32) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_sessions
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY updated_at DESC, id ASC
             LIMIT $2",
            SESSION_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        into_sessions(rows)
    }

    async fn transition_session(&self, session: &Session, from: SessionStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET status = $2, agent_id = $3, metadata = $4, updated_at = GREATEST(updated_at, $5)
            WHERE id = $1 AND status = $6
            "#,
        )
        .bind(session.id)
        .bind(session.status.as_str())
        .bind(&session.agent_id)
        .bind(&session.metadata)
        .bind(session.updated_at)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_session(session.id).await? {
            Some(_) => Ok(false),
            None => Err(HandoffError::session_not_found(session.id)),
        }
    }

    async fn touch_session(&self, id: Uuid, at: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET updated_at = GREATEST(updated_at, $2) WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(HandoffError::session_not_found(id));
        }
        Ok(())
    }

    async fn waiting_ahead(&self, created_at: i64) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::bigint FROM chat_sessions WHERE status = 'waiting' AND created_at <= $1",
        )
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u32)
    }

    async fn stale_waiting(&self, before: i64) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_sessions WHERE status = 'waiting' AND updated_at < $1",
            SESSION_COLUMNS
        ))
        .bind(before)
        .fetch_all(&self.pool)
        .await?;
        into_sessions(rows)
    }

    async fn insert_message(&self, message: &Message) -> Result<InsertResult> {
        let mut tx = self.pool.begin().await?;

        // Serializes writers of this session until commit.
        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM chat_sessions WHERE id = $1 FOR UPDATE")
                .bind(message.session_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(HandoffError::session_not_found(message.session_id));
        }

        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM chat_messages WHERE session_id = $1")
                .bind(message.session_id)
                .fetch_one(&mut *tx)
                .await?;
        let mut stored = message.clone();
        if let Some(latest) = latest {
            stored.timestamp = stored.timestamp.max(latest + 1);
        }

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO chat_messages (id, session_id, role, content, category, created_at, client_message_id, marker)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(stored.id)
        .bind(stored.session_id)
        .bind(stored.role.as_str())
        .bind(&stored.content)
        .bind(&stored.category)
        .bind(stored.timestamp)
        .bind(&stored.client_message_id)
        .bind(stored.marker.map(|m| m.as_str()))
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        if inserted.is_some() {
            return Ok(InsertResult::Inserted(stored));
        }

        let existing = match (&message.client_message_id, message.marker) {
            (Some(cmid), _) => self.find_by_client_message_id(message.session_id, cmid).await?,
            (None, Some(marker)) => self.find_marker(message.session_id, marker).await?,
            (None, None) => None,
        };

        match existing {
            Some(m) => Ok(InsertResult::Conflict(m)),
            None => Err(HandoffError::Other(format!(
                "Insert of message {} conflicted but no existing row was found",
                message.id
            ))),
        }
    }

    async fn find_by_client_message_id(
        &self,
        session_id: Uuid,
        client_message_id: &str,
    ) -> Result<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_messages WHERE session_id = $1 AND client_message_id = $2",
            MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(client_message_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Message::try_from).transpose()
    }

    async fn find_recent_identical(
        &self,
        session_id: Uuid,
        role: Role,
        content: &str,
        since: i64,
    ) -> Result<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_messages
             WHERE session_id = $1 AND role = $2 AND content = $3 AND created_at >= $4
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
            MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Message::try_from).transpose()
    }

    async fn find_marker(&self, session_id: Uuid, marker: SyntheticMarker) -> Result<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_messages WHERE session_id = $1 AND marker = $2",
            MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(marker.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Message::try_from).transpose()
    }

    async fn messages_after(&self, session_id: Uuid, after: i64) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM chat_messages
             WHERE session_id = $1 AND created_at > $2
             ORDER BY created_at ASC, id ASC",
            MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(after)
        .fetch_all(&self.pool)
        .await?;
        into_messages(rows)
    }

    async fn recent_messages(&self, session_id: Uuid, since: i64, limit: u32) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT * FROM (
                SELECT {} FROM chat_messages
                WHERE session_id = $1 AND created_at >= $2
                ORDER BY created_at DESC, id DESC
                LIMIT $3
             ) recent
             ORDER BY created_at ASC, id ASC",
            MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        into_messages(rows)
    }

    async fn ping(&self) -> Result<String> {
        Ok(crate::db::health_check(&self.pool).await?)
    }
}

// ============================================================================
// TESTS: need a live Postgres, skipped when unavailable
// ============================================================================
