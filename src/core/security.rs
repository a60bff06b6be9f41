//! API key gate for the HTTP surface.
//!
//! One token per process guards every route but `/health`. Clients send it in
//! the `x-api-key` header.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::core::errors::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";
const TOKEN_ENV: &str = "DOCQA_SESSION_TOKEN";

#[derive(Debug, Clone)]
pub struct SessionToken {
    value: String,
}

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// 64 hex characters from two v4 UUIDs.
    pub fn generate() -> Self {
        Self::new(format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()))
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    fn matches(&self, presented: &str) -> bool {
        !presented.is_empty() && presented == self.value
    }
}

/// Token for this process: `DOCQA_SESSION_TOKEN` if set, else a generated one
/// published to `~/.docqa/.session_token` for a local frontend.
pub fn init_session_token() -> SessionToken {
    resolve_session_token(env::var(TOKEN_ENV).ok(), &session_token_path())
}

fn resolve_session_token(configured: Option<String>, publish_to: &Path) -> SessionToken {
    if let Some(token) = configured.filter(|t| !t.trim().is_empty()) {
        return SessionToken::new(token.trim());
    }

    let token = SessionToken::generate();
    if let Err(err) = publish_token(&token, publish_to) {
        tracing::warn!("Could not write session token to {}: {}", publish_to.display(), err);
    }
    token
}

fn publish_token(token: &SessionToken, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, token.value())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn session_token_path() -> PathBuf {
    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".docqa").join(".session_token")
}

pub fn require_api_key(headers: &HeaderMap, expected: &SessionToken) -> Result<(), ApiError> {
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if expected.matches(presented) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}
