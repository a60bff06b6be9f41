//! Document ingestion: directory walking and per-format text extraction.

mod extract;
mod loader;

use serde::{Deserialize, Serialize};

pub use extract::{docx_xml_to_text, strip_html_tags, FileKind};
pub use loader::DocumentLoader;

/// A loaded source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Hex SHA-256 of `file_path`.
    pub doc_id: String,
    pub file_name: String,
    /// Path relative to the directory the document was loaded from.
    pub file_path: String,
    pub text: String,
    pub metadata: serde_json::Value,
}
