//! Selectable LLM backends.

use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// A model the user can pick: a friendly label and the provider's model id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOption {
    pub label: String,
    pub model_id: String,
}

impl ModelOption {
    pub fn new(label: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            model_id: model_id.into(),
        }
    }
}

const BUILTIN_MODELS: [(&str, &str); 5] = [
    ("Llama 3.3 70B (Versatile)", "llama-3.3-70b-versatile"),
    ("Llama 3.1 8B (Instant)", "llama-3.1-8b-instant"),
    ("Llama 4 (Scout 17B)", "meta-llama/llama-4-scout-17b-16e-instruct"),
    ("Qwen 3 32B", "qwen/qwen3-32b"),
    ("GPT-OSS 20B", "openai/gpt-oss-20b"),
];

/// Ordered list of models. The first entry is the default selection.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    options: Vec<ModelOption>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self {
            options: BUILTIN_MODELS
                .iter()
                .map(|(label, id)| ModelOption::new(*label, *id))
                .collect(),
        }
    }
}

impl ModelRegistry {
    /// Uses `options` when non-empty, the built-in list otherwise.
    pub fn from_options(options: Vec<ModelOption>) -> Self {
        if options.is_empty() {
            Self::default()
        } else {
            Self { options }
        }
    }

    pub fn list(&self) -> &[ModelOption] {
        &self.options
    }

    pub fn default_option(&self) -> &ModelOption {
        // from_options never builds an empty list
        &self.options[0]
    }

    /// Looks a model up by label or model id. `None` selects the default.
    pub fn resolve(&self, selector: Option<&str>) -> Result<&ModelOption, ApiError> {
        let Some(selector) = selector.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(self.default_option());
        };

        self.options
            .iter()
            .find(|opt| opt.model_id == selector || opt.label == selector)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown model: {}", selector)))
    }
}
