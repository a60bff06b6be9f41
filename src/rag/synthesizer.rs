//! Compact response synthesis over retrieved nodes.
//!
//! Node texts are packed into as few prompt-sized windows as possible. The
//! first window is answered with the QA prompt; each further window refines
//! the running answer.

use std::sync::OnceLock;

use regex::Regex;

use super::store::ScoredNode;
use crate::core::errors::ApiError;
use crate::llm::{ChatMessage, ChatRequest, LlmProvider};

pub const SYSTEM_PROMPT: &str = "You are a precise data assistant.\n\
Guidelines:\n\
1. If the user asks for a specific fact (Name, Date, Company, Cost), output ONLY that fact. No full sentences.\n\
2. If the user asks for an explanation, provide a detailed response.\n\
3. NEVER output your internal thought process or <think> tags.\n\
4. Answer based strictly on the context provided.";

pub const EMPTY_RESPONSE: &str = "Empty Response";

const CHARS_PER_TOKEN: usize = 4;
const DEFAULT_ANSWER_RESERVE_TOKENS: usize = 1024;
const MIN_CONTEXT_CHARS: usize = 256;

fn qa_prompt(context: &str, query: &str) -> String {
    format!(
        "Context information is below.\n\
---------------------\n\
{context}\n\
---------------------\n\
Given the context information and not prior knowledge, answer the query.\n\
Query: {query}\n\
Answer: "
    )
}

fn refine_prompt(context: &str, query: &str, existing_answer: &str) -> String {
    format!(
        "The original query is as follows: {query}\n\
We have provided an existing answer: {existing_answer}\n\
We have the opportunity to refine the existing answer (only if needed) with some more context below.\n\
------------\n\
{context}\n\
------------\n\
Given the new context, refine the original answer to better answer the query. \
If the context isn't useful, return the original answer.\n\
Refined Answer: "
    )
}

/// Rough token estimate used for window packing.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Removes `<think>...</think>` blocks and trims. Falls back to the raw output
/// when nothing else is left.
pub fn clean_output(raw: &str) -> String {
    static THINK_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = THINK_RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").ok());

    let cleaned = match re {
        Some(re) => re.replace_all(raw, "").trim().to_string(),
        None => raw.trim().to_string(),
    };

    if cleaned.is_empty() {
        raw.to_string()
    } else {
        cleaned
    }
}

pub struct CompactSynthesizer {
    context_window: usize,
    answer_reserve: usize,
    temperature: f64,
    max_tokens: Option<u32>,
}

impl CompactSynthesizer {
    pub fn new(context_window: usize, temperature: f64, max_tokens: Option<u32>) -> Self {
        let answer_reserve = max_tokens
            .map(|m| m as usize)
            .unwrap_or(DEFAULT_ANSWER_RESERVE_TOKENS);
        Self {
            context_window,
            answer_reserve,
            temperature,
            max_tokens,
        }
    }

    /// Characters of node text that fit in one prompt next to the longest
    /// template and the query.
    fn context_budget_chars(&self, query: &str) -> usize {
        let overhead = estimate_tokens(SYSTEM_PROMPT)
            + estimate_tokens(&refine_prompt("", query, ""))
            + self.answer_reserve;
        self.context_window
            .saturating_sub(overhead)
            .saturating_mul(CHARS_PER_TOKEN)
            .max(MIN_CONTEXT_CHARS)
    }

    /// Packs node texts, separated by blank lines, into windows of at most
    /// `budget` characters. Oversized nodes are split on char boundaries.
    pub fn pack(&self, nodes: &[ScoredNode], budget: usize) -> Vec<String> {
        let mut windows = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for scored in nodes {
            let text = scored.node.text.trim();
            if text.is_empty() {
                continue;
            }

            for piece in split_to_budget(text, budget) {
                let piece_len = piece.chars().count();
                let sep = if current.is_empty() { 0 } else { 2 };
                if current_len + sep + piece_len > budget && !current.is_empty() {
                    windows.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                if !current.is_empty() {
                    current.push_str("\n\n");
                    current_len += 2;
                }
                current.push_str(piece);
                current_len += piece_len;
            }
        }

        if !current.is_empty() {
            windows.push(current);
        }
        windows
    }

    pub async fn synthesize(
        &self,
        llm: &dyn LlmProvider,
        model_id: &str,
        query: &str,
        nodes: &[ScoredNode],
    ) -> Result<String, ApiError> {
        let windows = self.pack(nodes, self.context_budget_chars(query));
        if windows.is_empty() {
            return Ok(EMPTY_RESPONSE.to_string());
        }

        let mut answer: Option<String> = None;
        for (i, window) in windows.iter().enumerate() {
            let prompt = match &answer {
                None => qa_prompt(window, query),
                Some(existing) => refine_prompt(window, query, existing),
            };
            tracing::debug!(
                "Synthesis step {}/{} with {} ({} est. tokens)",
                i + 1,
                windows.len(),
                model_id,
                estimate_tokens(&prompt)
            );

            let request = ChatRequest::new(vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(prompt),
            ])
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

            let reply = llm.chat(request, model_id).await?;
            let reply = reply.trim();
            // keep the previous answer if a refine step comes back empty
            if !reply.is_empty() || answer.is_none() {
                answer = Some(reply.to_string());
            }
        }

        Ok(answer.unwrap_or_else(|| EMPTY_RESPONSE.to_string()))
    }
}

fn split_to_budget(text: &str, budget: usize) -> Vec<&str> {
    let budget = budget.max(1);
    let mut pieces = Vec::new();
    let mut rest = text;
    while rest.chars().count() > budget {
        let cut = rest
            .char_indices()
            .nth(budget)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        pieces.push(&rest[..cut]);
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}
