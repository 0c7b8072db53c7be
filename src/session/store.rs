use crate::session::error::{SessionError, SessionResult};
use crate::session::types::{UploadSession, UploadStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (creating if needed) a SQLite-backed session store
    pub async fn new(db_url: &str) -> SessionResult<Self> {
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Create session store with in-memory database (for testing)
    ///
    /// Every connection to `sqlite::memory:` is a separate database, so the pool is
    /// pinned to one connection that is never recycled.
    pub async fn new_in_memory() -> SessionResult<Self> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> SessionResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_sessions (
                upload_id TEXT PRIMARY KEY,
                file_name TEXT NOT NULL,
                file_type TEXT NOT NULL,
                total_size INTEGER NOT NULL,
                chunk_size INTEGER,
                total_chunks INTEGER NOT NULL,
                status TEXT NOT NULL,
                final_url TEXT,
                checksum TEXT,
                error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_upload_sessions_status ON upload_sessions(status)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_upload_sessions_updated ON upload_sessions(updated_at)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    fn row_to_session(row: &SqliteRow) -> SessionResult<UploadSession> {
        let status: String = row.try_get("status")?;
        let total_size: i64 = row.try_get("total_size")?;
        let chunk_size: Option<i64> = row.try_get("chunk_size")?;
        let total_chunks: i64 = row.try_get("total_chunks")?;

        Ok(UploadSession {
            upload_id: row.try_get("upload_id")?,
            file_name: row.try_get("file_name")?,
            file_type: row.try_get("file_type")?,
            total_size: u64::try_from(total_size)
                .map_err(|_| SessionError::CorruptRow(format!("total_size {total_size}")))?,
            chunk_size: chunk_size.map(|c| c.max(0) as u64),
            total_chunks: u32::try_from(total_chunks)
                .map_err(|_| SessionError::CorruptRow(format!("total_chunks {total_chunks}")))?,
            status: UploadStatus::from_str(&status).map_err(SessionError::CorruptRow)?,
            final_url: row.try_get("final_url")?,
            checksum: row.try_get("checksum")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Save or update session state
    pub async fn save(&self, session: &UploadSession) -> SessionResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO upload_sessions
            (upload_id, file_name, file_type, total_size, chunk_size, total_chunks,
             status, final_url, checksum, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.upload_id)
        .bind(&session.file_name)
        .bind(&session.file_type)
        .bind(session.total_size as i64)
        .bind(session.chunk_size.map(|c| c as i64))
        .bind(session.total_chunks as i64)
        .bind(session.status.as_str())
        .bind(&session.final_url)
        .bind(&session.checksum)
        .bind(&session.error)
        .bind(session.created_at)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert the session unless one with the same id exists. Returns true if inserted.
    pub async fn create_if_absent(&self, session: &UploadSession) -> SessionResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO upload_sessions
            (upload_id, file_name, file_type, total_size, chunk_size, total_chunks,
             status, final_url, checksum, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, ?, ?)
            "#,
        )
        .bind(&session.upload_id)
        .bind(&session.file_name)
        .bind(&session.file_type)
        .bind(session.total_size as i64)
        .bind(session.chunk_size.map(|c| c as i64))
        .bind(session.total_chunks as i64)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Load session by ID
    pub async fn load(&self, upload_id: &str) -> SessionResult<Option<UploadSession>> {
        let row = sqlx::query("SELECT * FROM upload_sessions WHERE upload_id = ?")
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    /// Update session status, recording an error message for failures
    pub async fn update_status(
        &self,
        upload_id: &str,
        status: UploadStatus,
        error: Option<String>,
    ) -> SessionResult<()> {
        let result = sqlx::query(
            "UPDATE upload_sessions SET status = ?, error = ?, updated_at = ? WHERE upload_id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(chrono::Utc::now().timestamp())
        .bind(upload_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SessionError::NotFound(upload_id.to_string()));
        }
        Ok(())
    }

    /// Refresh `updated_at` and reopen the session for chunks.
    ///
    /// Callers hold the session's shared lock, so a `merging` status seen here is left
    /// over from an interrupted merge.
    pub async fn touch_uploading(&self, upload_id: &str) -> SessionResult<()> {
        sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = CASE WHEN status IN ('pending', 'failed', 'merging') THEN 'uploading' ELSE status END,
                error = CASE WHEN status = 'failed' THEN NULL ELSE error END,
                updated_at = ?
            WHERE upload_id = ?
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(upload_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a successful merge
    pub async fn complete(&self, upload_id: &str, final_url: &str, checksum: &str) -> SessionResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'completed', final_url = ?, checksum = ?, error = NULL, updated_at = ?
            WHERE upload_id = ?
            "#,
        )
        .bind(final_url)
        .bind(checksum)
        .bind(chrono::Utc::now().timestamp())
        .bind(upload_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SessionError::NotFound(upload_id.to_string()));
        }
        Ok(())
    }

    /// Sessions not touched since `cutoff` (unix seconds)
    pub async fn list_stale(&self, cutoff: i64) -> SessionResult<Vec<UploadSession>> {
        let rows = sqlx::query("SELECT * FROM upload_sessions WHERE updated_at < ?")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_session).collect()
    }

    /// Delete session
    pub async fn delete(&self, upload_id: &str) -> SessionResult<bool> {
        let result = sqlx::query("DELETE FROM upload_sessions WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Check if session exists
    pub async fn exists(&self, upload_id: &str) -> SessionResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM upload_sessions WHERE upload_id = ?")
            .bind(upload_id)
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.try_get("count")?;
        Ok(count > 0)
    }

    #[cfg(test)]
    pub(crate) async fn set_updated_at(&self, upload_id: &str, updated_at: i64) -> SessionResult<()> {
        sqlx::query("UPDATE upload_sessions SET updated_at = ? WHERE upload_id = ?")
            .bind(updated_at)
            .bind(upload_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
