//! Session store on SQLite, shareable by several coordinator processes.
//!
//! Each session is one row: the full record as JSON plus the columns the
//! queries filter on. Updates are compare-and-swap on a `version` column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::debug;

use crate::session_store::{session_not_found, SessionMutation, UploadSessionStore};
use crate::{SessionId, SessionStatus, UploadError, UploadResult, UploadSession};

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS upload_sessions (
        id          TEXT PRIMARY KEY,
        owner_id    TEXT NOT NULL,
        status      TEXT NOT NULL,
        expires_at  INTEGER NOT NULL,
        created_at  INTEGER NOT NULL,
        version     INTEGER NOT NULL DEFAULT 0,
        body        TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_upload_sessions_owner ON upload_sessions (owner_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_upload_sessions_status ON upload_sessions (status)",
    "CREATE INDEX IF NOT EXISTS idx_upload_sessions_expires ON upload_sessions (expires_at)",
];

/// SQLite-backed [`UploadSessionStore`]
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
    max_update_attempts: u32,
}

impl SqliteSessionStore {
    /// Connect to `url` (e.g. `sqlite://uploads.db?mode=rwc`) and create the schema
    pub async fn connect(url: &str) -> UploadResult<Self> {
        let pool = SqlitePoolOptions::new().max_connections(5).connect(url).await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database
    pub async fn in_memory() -> UploadResult<Self> {
        // One connection: every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> UploadResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self {
            pool,
            max_update_attempts: 8,
        })
    }

    /// Compare-and-swap attempts before an update gives up with Conflict
    pub fn with_max_update_attempts(mut self, attempts: u32) -> Self {
        self.max_update_attempts = attempts.max(1);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch(&self, id: &SessionId) -> UploadResult<(UploadSession, i64)> {
        let row = sqlx::query_as::<_, (String, i64)>("SELECT body, version FROM upload_sessions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let (body, version) = row.ok_or_else(session_not_found)?;
        Ok((serde_json::from_str(&body)?, version))
    }
}

fn decode_all(rows: Vec<(String,)>) -> UploadResult<Vec<UploadSession>> {
    rows.into_iter()
        .map(|(body,)| serde_json::from_str(&body).map_err(UploadError::from))
        .collect()
}

#[async_trait]
impl UploadSessionStore for SqliteSessionStore {
    async fn create(&self, session: UploadSession) -> UploadResult<UploadSession> {
        let body = serde_json::to_string(&session)?;

        let inserted = sqlx::query(
            "INSERT INTO upload_sessions (id, owner_id, status, expires_at, created_at, version, body)
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(session.id.as_str())
        .bind(&session.owner_id)
        .bind(session.status.as_str())
        .bind(session.expires_at.timestamp_millis())
        .bind(session.created_at.timestamp_millis())
        .bind(body)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(session),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(UploadError::conflict(format!(
                "Upload session {} already exists",
                session.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &SessionId) -> UploadResult<UploadSession> {
        Ok(self.fetch(id).await?.0)
    }

    async fn update(&self, id: &SessionId, mutation: &mut SessionMutation<'_>) -> UploadResult<UploadSession> {
        for attempt in 1..=self.max_update_attempts {
            let (mut session, version) = self.fetch(id).await?;
            mutation(&mut session)?;
            session.updated_at = Utc::now();

            let swapped = sqlx::query(
                "UPDATE upload_sessions
                 SET body = ?, status = ?, expires_at = ?, version = version + 1
                 WHERE id = ? AND version = ?",
            )
            .bind(serde_json::to_string(&session)?)
            .bind(session.status.as_str())
            .bind(session.expires_at.timestamp_millis())
            .bind(id.as_str())
            .bind(version)
            .execute(&self.pool)
            .await?;

            if swapped.rows_affected() == 1 {
                return Ok(session);
            }
            debug!(session_id = %id, attempt, "session changed underneath update, retrying");
        }

        Err(UploadError::conflict("Upload session is being modified concurrently"))
    }

    async fn list_by_owner(&self, owner_id: &str) -> UploadResult<Vec<UploadSession>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT body FROM upload_sessions WHERE owner_id = ? ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> UploadResult<Vec<UploadSession>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT body FROM upload_sessions WHERE status IN (?, ?) AND expires_at <= ?",
        )
        .bind(SessionStatus::Pending.as_str())
        .bind(SessionStatus::InProgress.as_str())
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn delete(&self, id: &SessionId) -> UploadResult<()> {
        sqlx::query("DELETE FROM upload_sessions WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
