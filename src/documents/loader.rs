use std::path::{Path, PathBuf};

use serde_json::json;
use sha2::{Digest, Sha256};
use walkdir::{DirEntry, WalkDir};

use super::extract::{extract_text, FileKind};
use super::Document;
use crate::core::errors::ApiError;

/// Reads every supported file under a directory into [`Document`]s.
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    recursive: bool,
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self { recursive: true }
    }
}

impl DocumentLoader {
    pub fn new(recursive: bool) -> Self {
        Self { recursive }
    }

    /// Loads all supported files. Files that fail to parse are skipped with a
    /// warning; only an unreadable input directory is an error.
    pub async fn load_directory(&self, dir: &Path) -> Result<Vec<Document>, ApiError> {
        if !dir.is_dir() {
            return Err(ApiError::NotFound(format!(
                "Input directory does not exist: {}",
                dir.display()
            )));
        }

        let files = self.collect_files(dir)?;
        let mut documents = Vec::with_capacity(files.len());

        for (path, kind) in files {
            match load_file(dir, &path, kind).await {
                Ok(Some(doc)) => {
                    tracing::debug!("Loaded {} ({} chars)", doc.file_path, doc.text.len());
                    documents.push(doc);
                }
                Ok(None) => tracing::debug!("Skipping empty file {}", path.display()),
                Err(err) => tracing::warn!("Skipping {}: {}", path.display(), err),
            }
        }

        tracing::info!(
            "Loaded {} documents from {}",
            documents.len(),
            dir.display()
        );
        Ok(documents)
    }

    fn collect_files(&self, dir: &Path) -> Result<Vec<(PathBuf, FileKind)>, ApiError> {
        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut files = Vec::new();

        let walker = WalkDir::new(dir)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => return Err(ApiError::internal(err)),
                Err(err) => {
                    tracing::warn!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match FileKind::from_path(entry.path()) {
                Some(kind) => files.push((entry.into_path(), kind)),
                None => tracing::debug!("Unsupported file type: {}", entry.path().display()),
            }
        }

        Ok(files)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

async fn load_file(root: &Path, path: &Path, kind: FileKind) -> Result<Option<Document>, ApiError> {
    let text = extract_text(path, kind).await?;
    if text.trim().is_empty() {
        return Ok(None);
    }

    let relative = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| relative.clone());
    let file_size = tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(Some(Document {
        doc_id: hex::encode(Sha256::digest(relative.as_bytes())),
        metadata: json!({
            "file_name": file_name,
            "file_path": relative,
            "file_type": kind.as_str(),
            "file_size": file_size,
        }),
        file_name,
        file_path: relative,
        text,
    }))
}
