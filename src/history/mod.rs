use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for MessageRole {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ApiError::BadRequest(format!("Unknown role: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Set once documents were processed successfully for this session.
    pub db_ready: bool,
    #[serde(default)]
    pub message_count: i64,
    #[serde(default)]
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: i64,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Friendly label of the model that produced an assistant message.
    pub model_name: Option<String>,
    pub created_at: String,
}

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

const PREVIEW_CHARS: usize = 80;

impl HistoryStore {
    pub async fn new(db_path: &Path) -> Result<Self, ApiError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ApiError::internal)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to connect to history db: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                title TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                db_ready INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init sessions table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                model_name TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init messages table: {}", e)))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id)")
            .execute(&pool)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to create index: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn create_session(&self, title: Option<String>) -> Result<SessionInfo, ApiError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO sessions (id, title, created_at, updated_at, db_ready) VALUES (?, ?, ?, ?, 0)",
        )
        .bind(&session_id)
        .bind(&title)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create session: {}", e)))?;

        Ok(SessionInfo {
            id: session_id,
            title,
            created_at: now.clone(),
            updated_at: now,
            db_ready: false,
            message_count: 0,
            preview: None,
        })
    }

    fn session_from_row(row: &SqliteRow) -> SessionInfo {
        let preview: Option<String> = row.try_get("preview").unwrap_or(None);
        SessionInfo {
            id: row.try_get("id").unwrap_or_default(),
            title: row.try_get("title").unwrap_or(None),
            created_at: row.try_get("created_at").unwrap_or_default(),
            updated_at: row.try_get("updated_at").unwrap_or_default(),
            db_ready: row.try_get::<i64, _>("db_ready").unwrap_or(0) != 0,
            message_count: row.try_get("msg_count").unwrap_or(0),
            preview: preview.map(|p| p.chars().take(PREVIEW_CHARS).collect()),
        }
    }

    const SESSION_SELECT: &'static str = "SELECT s.id, s.title, s.created_at, s.updated_at, s.db_ready, \
         (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id) AS msg_count, \
         (SELECT content FROM messages m WHERE m.session_id = s.id AND m.role = 'user' \
          ORDER BY m.id DESC LIMIT 1) AS preview \
         FROM sessions s";

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>, ApiError> {
        let row = sqlx::query(&format!("{} WHERE s.id = ?", Self::SESSION_SELECT))
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(row.as_ref().map(Self::session_from_row))
    }

    /// Like `get_session` but a missing session is `NotFound`.
    pub async fn require_session(&self, session_id: &str) -> Result<SessionInfo, ApiError> {
        self.get_session(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", session_id)))
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>, ApiError> {
        let rows = sqlx::query(&format!(
            "{} ORDER BY s.updated_at DESC LIMIT 100",
            Self::SESSION_SELECT
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows.iter().map(Self::session_from_row).collect())
    }

    pub async fn set_db_ready(&self, session_id: &str, ready: bool) -> Result<(), ApiError> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE sessions SET db_ready = ?, updated_at = ? WHERE id = ?")
            .bind(ready as i64)
            .bind(now)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("Session not found: {}", session_id)));
        }
        Ok(())
    }

    pub async fn update_session_title(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<(), ApiError> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE sessions SET title = ?, updated_at = ? WHERE id = ?")
            .bind(title)
            .bind(now)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("Session not found: {}", session_id)));
        }
        Ok(())
    }

    /// Returns whether a session was deleted. Messages cascade.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        model_name: Option<&str>,
    ) -> Result<i64, ApiError> {
        let now = chrono::Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        let touched = sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        if touched.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("Session not found: {}", session_id)));
        }

        let result = sqlx::query(
            "INSERT INTO messages (session_id, role, content, model_name, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(model_name)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;

        Ok(result.last_insert_rowid())
    }

    /// The most recent `limit` messages, oldest first. `limit <= 0` means all.
    pub async fn get_history(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<HistoryMessage>, ApiError> {
        let rows = if limit > 0 {
            sqlx::query(
                "SELECT * FROM (SELECT * FROM messages WHERE session_id = ? ORDER BY id DESC LIMIT ?) ORDER BY id ASC",
            )
            .bind(session_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?
        } else {
            sqlx::query("SELECT * FROM messages WHERE session_id = ? ORDER BY id ASC")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await
                .map_err(ApiError::internal)?
        };

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row.try_get("role").map_err(ApiError::internal)?;
            messages.push(HistoryMessage {
                id: row.try_get("id").unwrap_or_default(),
                session_id: row.try_get("session_id").unwrap_or_default(),
                role: role.parse()?,
                content: row.try_get("content").unwrap_or_default(),
                model_name: row.try_get("model_name").unwrap_or(None),
                created_at: row.try_get("created_at").unwrap_or_default(),
            });
        }

        Ok(messages)
    }
}
