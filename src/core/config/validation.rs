use serde_json::{Map, Value};

use crate::core::errors::ApiError;

type Section = Map<String, Value>;

/// Largest accepted `app.max_upload_bytes`.
pub const MAX_UPLOAD_BYTES_CEILING: usize = 2_000_000_000;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(rag) = optional_section(root, "rag")? {
        let s = Checker::new("rag", rag);
        s.u64_in("similarity_top_k", 1, 1_000)?;
        s.one_of("splitter", &["semantic", "fixed"])?;
        s.u64_in("buffer_size", 0, 16)?;
        s.f64_in("breakpoint_percentile_threshold", 0.0, 100.0)?;
        s.u64_in("chunk_size", 16, 100_000)?;
        s.u64_in("chunk_overlap", 0, 50_000)?;
        s.non_empty_string("collection")?;

        let size = rag.get("chunk_size").and_then(Value::as_u64);
        let overlap = rag.get("chunk_overlap").and_then(Value::as_u64);
        if let (Some(size), Some(overlap)) = (size, overlap) {
            if overlap >= size {
                return Err(ApiError::BadRequest(
                    "Invalid config at 'rag.chunk_overlap': must be smaller than rag.chunk_size"
                        .to_string(),
                ));
            }
        }
    }

    if let Some(embedding) = optional_section(root, "embedding")? {
        let s = Checker::new("embedding", embedding);
        s.http_url("base_url")?;
        s.non_empty_string("model")?;
        s.u64_in("batch_size", 1, 4_096)?;
        s.string("query_instruction")?;
        s.u64_in("timeout_secs", 1, 3_600)?;
    }

    if let Some(llm) = optional_section(root, "llm")? {
        let s = Checker::new("llm", llm);
        s.http_url("base_url")?;
        s.string("api_key")?;
        s.f64_in("temperature", 0.0, 2.0)?;
        s.u64_in("max_tokens", 1, 1_000_000)?;
        s.u64_in("timeout_secs", 1, 3_600)?;
        s.u64_in("context_window", 512, 10_000_000)?;
        validate_model_list(llm)?;
    }

    if let Some(reranker) = optional_section(root, "reranker")? {
        let s = Checker::new("reranker", reranker);
        s.bool("enabled")?;
        s.http_url("base_url")?;
        s.non_empty_string("model")?;
        s.u64_in("top_n", 1, 1_000)?;
        s.u64_in("timeout_secs", 1, 3_600)?;
    }

    if let Some(app) = optional_section(root, "app")? {
        let s = Checker::new("app", app);
        s.u64_in("max_upload_bytes", 1, MAX_UPLOAD_BYTES_CEILING as u64)?;
        s.u64_in("history_limit", 1, 100_000)?;
        s.u64_in("max_concurrent_jobs", 1, 64)?;
    }

    if let Some(server) = optional_section(root, "server")? {
        Checker::new("server", server).string_array("cors_allowed_origins")?;
    }

    Ok(())
}

fn validate_model_list(llm: &Section) -> Result<(), ApiError> {
    let Some(value) = llm.get("models") else {
        return Ok(());
    };
    let items = value
        .as_array()
        .ok_or_else(|| config_type_error("llm.models", "array"))?;

    for (index, item) in items.iter().enumerate() {
        let path = format!("llm.models[{}]", index);
        let entry = item
            .as_object()
            .ok_or_else(|| config_type_error(&path, "object"))?;
        for key in ["label", "model_id"] {
            let text = entry.get(key).and_then(Value::as_str).unwrap_or("");
            if text.trim().is_empty() {
                return Err(ApiError::BadRequest(format!(
                    "Invalid config at '{}.{}': value is required",
                    path, key
                )));
            }
        }
    }
    Ok(())
}

fn optional_section<'a>(root: &'a Section, key: &str) -> Result<Option<&'a Section>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(config_type_error(key, "object")),
    }
}

/// Field checks for one config section. Absent keys always pass.
struct Checker<'a> {
    name: &'a str,
    section: &'a Section,
}

impl<'a> Checker<'a> {
    fn new(name: &'a str, section: &'a Section) -> Self {
        Self { name, section }
    }

    fn path(&self, key: &str) -> String {
        format!("{}.{}", self.name, key)
    }

    fn bool(&self, key: &str) -> Result<(), ApiError> {
        match self.section.get(key) {
            Some(value) if value.as_bool().is_none() => {
                Err(config_type_error(&self.path(key), "boolean"))
            }
            _ => Ok(()),
        }
    }

    fn u64_in(&self, key: &str, min: u64, max: u64) -> Result<(), ApiError> {
        let Some(value) = self.section.get(key) else {
            return Ok(());
        };
        let Some(number) = value.as_u64() else {
            return Err(config_type_error(&self.path(key), "integer"));
        };
        if number < min || number > max {
            return Err(range_error(&self.path(key), min, max));
        }
        Ok(())
    }

    fn f64_in(&self, key: &str, min: f64, max: f64) -> Result<(), ApiError> {
        let Some(value) = self.section.get(key) else {
            return Ok(());
        };
        let Some(number) = value.as_f64() else {
            return Err(config_type_error(&self.path(key), "number"));
        };
        if !(min..=max).contains(&number) {
            return Err(range_error(&self.path(key), min, max));
        }
        Ok(())
    }

    fn string(&self, key: &str) -> Result<(), ApiError> {
        match self.section.get(key) {
            Some(value) if !value.is_string() && !value.is_null() => {
                Err(config_type_error(&self.path(key), "string"))
            }
            _ => Ok(()),
        }
    }

    fn non_empty_string(&self, key: &str) -> Result<(), ApiError> {
        let Some(value) = self.section.get(key) else {
            return Ok(());
        };
        let Some(text) = value.as_str() else {
            return Err(config_type_error(&self.path(key), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at '{}': value cannot be empty",
                self.path(key)
            )));
        }
        Ok(())
    }

    fn one_of(&self, key: &str, allowed: &[&str]) -> Result<(), ApiError> {
        let Some(value) = self.section.get(key) else {
            return Ok(());
        };
        match value.as_str() {
            Some(text) if allowed.contains(&text) => Ok(()),
            _ => Err(config_type_error(
                &self.path(key),
                &format!("one of {}", allowed.join(", ")),
            )),
        }
    }

    fn http_url(&self, key: &str) -> Result<(), ApiError> {
        self.string(key)?;
        let Some(text) = self.section.get(key).and_then(Value::as_str) else {
            return Ok(());
        };
        if text.starts_with("http://") || text.starts_with("https://") {
            return Ok(());
        }
        Err(config_type_error(&self.path(key), "http(s) URL"))
    }

    fn string_array(&self, key: &str) -> Result<(), ApiError> {
        let Some(value) = self.section.get(key) else {
            return Ok(());
        };
        let Some(items) = value.as_array() else {
            return Err(config_type_error(&self.path(key), "array of strings"));
        };
        for (index, item) in items.iter().enumerate() {
            let text = item.as_str().unwrap_or("");
            if text.trim().is_empty() {
                return Err(config_type_error(
                    &format!("{}[{}]", self.path(key), index),
                    "non-empty string",
                ));
            }
        }
        Ok(())
    }
}

fn range_error<T: std::fmt::Display>(path: &str, min: T, max: T) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': must be between {} and {}",
        path, min, max
    ))
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
