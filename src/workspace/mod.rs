//! Per-session working directories.
//!
//! Every session owns `<base>/<session_id>/files` for uploads and
//! `<base>/<session_id>/db` for its vector index, so one session can never
//! read another's documents.

use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

use crate::core::errors::ApiError;

pub const FILES_DIR: &str = "files";
pub const DB_DIR: &str = "db";

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionWorkspace {
    pub session_id: String,
    pub root: PathBuf,
    pub files_dir: PathBuf,
    pub db_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
}

/// Canonical form of a session id; anything that is not a UUID is rejected.
pub fn parse_session_id(session_id: &str) -> Result<String, ApiError> {
    Uuid::parse_str(session_id.trim())
        .map(|id| id.to_string())
        .map_err(|_| ApiError::BadRequest(format!("Invalid session id: {}", session_id)))
}

/// Reduces an uploaded file name to its last path component.
pub fn sanitize_file_name(name: &str) -> Result<String, ApiError> {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(char::from(0));

    if last.is_empty() || last == "." || last == ".." {
        return Err(ApiError::BadRequest(format!("Invalid file name: {:?}", name)));
    }
    Ok(last.to_string())
}

impl WorkspaceManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn layout(&self, session_id: &str) -> Result<SessionWorkspace, ApiError> {
        let session_id = parse_session_id(session_id)?;
        let root = self.base_dir.join(&session_id);
        Ok(SessionWorkspace {
            files_dir: root.join(FILES_DIR),
            db_dir: root.join(DB_DIR),
            root,
            session_id,
        })
    }

    /// Returns the workspace, creating both directories if needed.
    pub async fn open(&self, session_id: &str) -> Result<SessionWorkspace, ApiError> {
        let workspace = self.layout(session_id)?;
        tokio::fs::create_dir_all(&workspace.files_dir)
            .await
            .map_err(ApiError::internal)?;
        tokio::fs::create_dir_all(&workspace.db_dir)
            .await
            .map_err(ApiError::internal)?;
        Ok(workspace)
    }

    /// Deletes the whole session directory. Missing directories are fine.
    pub async fn remove(&self, session_id: &str) -> Result<(), ApiError> {
        let workspace = self.layout(session_id)?;
        match tokio::fs::remove_dir_all(&workspace.root).await {
            Ok(()) => {
                tracing::debug!("Removed workspace {}", workspace.root.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::internal(e)),
        }
    }
}

impl SessionWorkspace {
    /// Empties the upload directory before a new batch.
    pub async fn reset_files(&self) -> Result<(), ApiError> {
        match tokio::fs::remove_dir_all(&self.files_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ApiError::internal(e)),
        }
        tokio::fs::create_dir_all(&self.files_dir)
            .await
            .map_err(ApiError::internal)
    }

    pub async fn save_file(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, ApiError> {
        let file_name = sanitize_file_name(name)?;
        let path = self.files_dir.join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(ApiError::internal)?;
        Ok(path)
    }

    /// Uploaded files, sorted by name.
    pub async fn list_files(&self) -> Result<Vec<StoredFile>, ApiError> {
        let mut entries = match tokio::fs::read_dir(&self.files_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ApiError::internal(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(ApiError::internal)? {
            let metadata = entry.metadata().await.map_err(ApiError::internal)?;
            if metadata.is_file() {
                files.push(StoredFile {
                    name: entry.file_name().to_string_lossy().to_string(),
                    size: metadata.len(),
                });
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}
