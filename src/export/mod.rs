//! Chat transcript export.

use std::str::FromStr;

use serde_json::json;

use crate::core::errors::ApiError;
use crate::history::{HistoryMessage, MessageRole, SessionInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    Text,
    Json,
}

impl FromStr for ExportFormat {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(Self::Markdown),
            "txt" | "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ApiError::BadRequest(format!(
                "Unsupported export format: {} (use md, txt or json)",
                other
            ))),
        }
    }
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Text => "txt",
            Self::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Markdown => "text/markdown; charset=utf-8",
            Self::Text => "text/plain; charset=utf-8",
            Self::Json => "application/json",
        }
    }
}

/// `User` or `AI (<model label>)`, as shown in the chat.
fn speaker(message: &HistoryMessage) -> String {
    match message.role {
        MessageRole::User => "User".to_string(),
        MessageRole::Assistant => format!(
            "AI ({})",
            message.model_name.as_deref().unwrap_or("Unknown")
        ),
    }
}

fn title(session: &SessionInfo) -> String {
    session
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "Chat transcript".to_string())
}

pub fn attachment_file_name(session: &SessionInfo, format: ExportFormat) -> String {
    let prefix: String = session.id.chars().take(8).collect();
    format!("chat-{}.{}", prefix, format.extension())
}

pub fn render(
    format: ExportFormat,
    session: &SessionInfo,
    messages: &[HistoryMessage],
) -> Result<String, ApiError> {
    let exported_at = chrono::Utc::now().to_rfc3339();

    match format {
        ExportFormat::Markdown => {
            let mut out = format!("# {}\n\n_Exported {}_\n\n", title(session), exported_at);
            for message in messages {
                out.push_str(&format!("**{}:** {}\n\n", speaker(message), message.content));
                if message.role == MessageRole::Assistant {
                    out.push_str("---\n\n");
                }
            }
            Ok(out)
        }
        ExportFormat::Text => {
            let mut out = format!("{}\nExported {}\n\n", title(session), exported_at);
            for message in messages {
                out.push_str(&format!("{}: {}\n\n", speaker(message), message.content));
            }
            Ok(out)
        }
        ExportFormat::Json => serde_json::to_string_pretty(&json!({
            "session": session,
            "exported_at": exported_at,
            "messages": messages,
        }))
        .map_err(ApiError::internal),
    }
}
