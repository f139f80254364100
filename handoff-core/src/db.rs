use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS chat_sessions (
        id             UUID PRIMARY KEY,
        customer_name  TEXT NOT NULL,
        customer_email TEXT NOT NULL,
        status         TEXT NOT NULL,
        agent_id       TEXT,
        created_at     BIGINT NOT NULL,
        updated_at     BIGINT NOT NULL,
        metadata       JSONB NOT NULL DEFAULT '{}'::jsonb
    )
    "#,
    "CREATE INDEX IF NOT EXISTS chat_sessions_status_idx ON chat_sessions (status, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS chat_messages (
        id                UUID PRIMARY KEY,
        session_id        UUID NOT NULL REFERENCES chat_sessions (id),
        role              TEXT NOT NULL,
        content           TEXT NOT NULL,
        category          TEXT NOT NULL,
        created_at        BIGINT NOT NULL,
        client_message_id TEXT,
        marker            TEXT
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS chat_messages_client_id_uniq
        ON chat_messages (session_id, client_message_id)
        WHERE client_message_id IS NOT NULL
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS chat_messages_marker_uniq
        ON chat_messages (session_id, marker)
        WHERE marker IS NOT NULL
    "#,
    "CREATE INDEX IF NOT EXISTS chat_messages_cursor_idx ON chat_messages (session_id, created_at, id)",
];

/// Create tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!("Chat schema ensured");
    Ok(())
}
