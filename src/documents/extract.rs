//! Plain-text extraction per file type.

use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tokio::process::Command;

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    PlainText,
    Html,
    Docx,
    Pdf,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "md" | "markdown" | "csv" | "json" | "log" | "rst" => Some(Self::PlainText),
            "html" | "htm" => Some(Self::Html),
            "docx" => Some(Self::Docx),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainText => "text",
            Self::Html => "html",
            Self::Docx => "docx",
            Self::Pdf => "pdf",
        }
    }
}

pub async fn extract_text(path: &Path, kind: FileKind) -> Result<String, ApiError> {
    match kind {
        FileKind::PlainText => {
            let bytes = tokio::fs::read(path).await.map_err(ApiError::internal)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        FileKind::Html => {
            let bytes = tokio::fs::read(path).await.map_err(ApiError::internal)?;
            Ok(strip_html_tags(&String::from_utf8_lossy(&bytes)))
        }
        FileKind::Docx => {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || extract_docx(&path))
                .await
                .map_err(ApiError::internal)?
        }
        FileKind::Pdf => extract_pdf(path).await,
    }
}

/// Runs poppler's `pdftotext`; page breaks come through as form feeds.
async fn extract_pdf(path: &Path) -> Result<String, ApiError> {
    let output = Command::new("pdftotext")
        .arg("-layout")
        .arg("-enc")
        .arg("UTF-8")
        .arg(path)
        .arg("-")
        .output()
        .await
        .map_err(|e| {
            ApiError::Internal(format!(
                "pdftotext command failed: {} (is poppler installed?)",
                e
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ApiError::Internal(format!("pdftotext failed: {}", stderr.trim())));
    }

    let text = String::from_utf8_lossy(&output.stdout).into_owned();
    if text.trim().is_empty() {
        return Err(ApiError::Internal(
            "pdftotext produced no text output".to_string(),
        ));
    }
    Ok(text)
}

fn extract_docx(path: &Path) -> Result<String, ApiError> {
    let file = std::fs::File::open(path).map_err(ApiError::internal)?;
    let mut archive = zip::ZipArchive::new(file).map_err(ApiError::internal)?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ApiError::Internal(format!("not a Word document: {}", e)))?;

    let mut xml = String::new();
    entry.read_to_string(&mut xml).map_err(ApiError::internal)?;
    Ok(docx_xml_to_text(&xml))
}

fn xml_tag_regex() -> Option<&'static Regex> {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]*>").ok()).as_ref()
}

/// Paragraphs and breaks become newlines, tabs stay tabs, all other markup is dropped.
pub fn docx_xml_to_text(xml: &str) -> String {
    let marked = xml
        .replace("</w:p>", "\n")
        .replace("<w:br/>", "\n")
        .replace("<w:tab/>", "\t");
    let stripped = match xml_tag_regex() {
        Some(re) => re.replace_all(&marked, "").into_owned(),
        None => marked,
    };
    let text = unescape_xml(&stripped);

    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Drops tags plus `<script>`/`<style>` bodies, then collapses blank lines.
pub fn strip_html_tags(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut result = String::with_capacity(html.len());
    let mut i = 0;
    let mut in_tag = false;
    let mut skip_until: Option<&[u8]> = None;

    while i < bytes.len() {
        if let Some(end) = skip_until {
            if bytes[i..].starts_with(end) {
                i += end.len();
                skip_until = None;
            } else {
                i += 1;
            }
            continue;
        }

        if bytes[i..].starts_with(b"<script") {
            skip_until = Some(b"</script>");
            continue;
        }
        if bytes[i..].starts_with(b"<style") {
            skip_until = Some(b"</style>");
            continue;
        }

        let Some(c) = html[i..].chars().next() else {
            break;
        };
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(c),
            _ => {}
        }
        i += c.len_utf8();
    }

    let collapsed = result
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    unescape_xml(&collapsed.replace("&nbsp;", " "))
}
