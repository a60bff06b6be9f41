//! Node parsers: turn [`Document`]s into retrievable [`Node`]s.
//!
//! `SemanticSplitter` groups consecutive sentences and cuts where the
//! embedding distance between neighbouring sentence windows spikes above a
//! percentile of all distances in the document. `FixedSizeSplitter` is the
//! plain sliding window used when `rag.splitter = fixed`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::embedding::Embedder;
use crate::core::config::settings::{ChunkingSettings, SplitterKind};
use crate::core::errors::ApiError;
use crate::documents::Document;
use crate::vector_math::{cosine_similarity, percentile};

/// A chunk of a document, the unit that gets embedded and retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub doc_id: String,
    pub text: String,
    pub chunk_index: usize,
    /// Byte offsets into the source document text.
    pub start_offset: usize,
    pub end_offset: usize,
    pub metadata: serde_json::Value,
}

impl Node {
    fn new(doc: &Document, chunk_index: usize, start: usize, end: usize) -> Self {
        let text = doc.text[start..end].to_string();
        let mut hasher = Sha256::new();
        hasher.update(doc.doc_id.as_bytes());
        hasher.update(b":");
        hasher.update(chunk_index.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());

        let mut metadata = doc.metadata.clone();
        if let Some(obj) = metadata.as_object_mut() {
            obj.insert("chunk_index".to_string(), chunk_index.into());
            obj.insert("start_offset".to_string(), start.into());
        }

        Self {
            node_id: hex::encode(hasher.finalize()),
            doc_id: doc.doc_id.clone(),
            text,
            chunk_index,
            start_offset: start,
            end_offset: end,
            metadata,
        }
    }

    pub fn file_name(&self) -> &str {
        self.metadata
            .get("file_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

/// Sentence spans (byte offsets), trimmed, empties dropped.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace, or at a blank line.
fn split_sentences(text: &str) -> Vec<Span> {
    let mut raw = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let next = chars.peek().map(|(_, n)| *n);
        match c {
            '.' | '!' | '?' if next.map_or(true, char::is_whitespace) => {
                let end = i + c.len_utf8();
                raw.push(Span { start, end });
                start = end;
            }
            '\n' if next_line_is_blank(&text[i + 1..]) => {
                raw.push(Span { start, end: i });
                start = i + 1;
            }
            _ => {}
        }
    }
    raw.push(Span {
        start,
        end: text.len(),
    });

    raw.into_iter()
        .filter_map(|span| trim_span(text, span))
        .collect()
}

/// True when `rest` opens with a whitespace-only line, `\r\n` endings included.
fn next_line_is_blank(rest: &str) -> bool {
    rest.find('\n')
        .is_some_and(|line_end| rest[..line_end].trim().is_empty())
}

fn trim_span(text: &str, span: Span) -> Option<Span> {
    let slice = &text[span.start..span.end];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    let start = span.start + leading;
    let end = span.end - trailing;
    (start < end).then_some(Span { start, end })
}

#[derive(Debug, Clone)]
pub struct SemanticSplitter {
    /// Sentences on each side folded into a sentence's comparison window.
    pub buffer_size: usize,
    pub breakpoint_percentile_threshold: f64,
}

impl Default for SemanticSplitter {
    fn default() -> Self {
        Self {
            buffer_size: 1,
            breakpoint_percentile_threshold: 95.0,
        }
    }
}

impl SemanticSplitter {
    pub async fn split(
        &self,
        doc: &Document,
        embedder: &dyn Embedder,
    ) -> Result<Vec<Node>, ApiError> {
        let sentences = split_sentences(&doc.text);
        if sentences.len() <= 1 {
            return Ok(sentences
                .first()
                .map(|s| vec![Node::new(doc, 0, s.start, s.end)])
                .unwrap_or_default());
        }

        let windows = self.sentence_windows(&doc.text, &sentences);
        let embeddings = embedder.embed_documents(&windows).await?;
        if embeddings.len() != windows.len() {
            return Err(ApiError::Upstream(format!(
                "Embedding count mismatch while splitting {}: {} != {}",
                doc.file_name,
                embeddings.len(),
                windows.len()
            )));
        }

        let distances: Vec<f32> = embeddings
            .windows(2)
            .map(|pair| 1.0 - cosine_similarity(&pair[0], &pair[1]))
            .collect();
        let breakpoints = self.breakpoints(&distances);

        let mut nodes = Vec::new();
        let mut group_start = 0;
        for cut in breakpoints.into_iter().chain(std::iter::once(sentences.len() - 1)) {
            let start = sentences[group_start].start;
            let end = sentences[cut].end;
            nodes.push(Node::new(doc, nodes.len(), start, end));
            group_start = cut + 1;
        }

        Ok(nodes)
    }

    fn sentence_windows(&self, text: &str, sentences: &[Span]) -> Vec<String> {
        (0..sentences.len())
            .map(|i| {
                let lo = i.saturating_sub(self.buffer_size);
                let hi = (i + self.buffer_size).min(sentences.len() - 1);
                sentences[lo..=hi]
                    .iter()
                    .map(|s| &text[s.start..s.end])
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    /// Indices of sentences after which a new chunk starts.
    fn breakpoints(&self, distances: &[f32]) -> Vec<usize> {
        let Some(threshold) = percentile(distances, self.breakpoint_percentile_threshold) else {
            return Vec::new();
        };
        distances
            .iter()
            .enumerate()
            .filter(|(_, d)| **d > threshold)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct FixedSizeSplitter {
    /// Window size in characters.
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl FixedSizeSplitter {
    pub fn split(&self, doc: &Document) -> Vec<Node> {
        let text = doc.text.as_str();
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = boundaries.len() - 1;

        let chunk_size = self.chunk_size.max(1);
        let mut nodes = Vec::new();
        let mut start = 0;

        while start < total_chars {
            let end = (start + chunk_size).min(total_chars);
            let (byte_start, mut byte_end) = (boundaries[start], boundaries[end]);
            let mut cut = end;

            if end < total_chars {
                byte_end = byte_start + sentence_cut(&text[byte_start..byte_end]);
                cut = boundaries.binary_search(&byte_end).unwrap_or_else(|i| i);
            }

            if let Some(span) = trim_span(
                text,
                Span {
                    start: byte_start,
                    end: byte_end,
                },
            ) {
                nodes.push(Node::new(doc, nodes.len(), span.start, span.end));
            }

            if end == total_chars {
                break;
            }
            // Overlap is measured back from the cut so nothing between windows is skipped.
            start = cut.saturating_sub(self.chunk_overlap).max(start + 1);
        }

        nodes
    }
}

/// Length of `window` cut at the last sentence end in its final 20%, or the full length.
fn sentence_cut(window: &str) -> usize {
    let mut search_start = window.len() * 4 / 5;
    while !window.is_char_boundary(search_start) {
        search_start -= 1;
    }

    [". ", "! ", "? ", ".\n", "!\n", "?\n"]
        .iter()
        .filter_map(|ending| {
            window[search_start..]
                .rfind(ending)
                .map(|pos| search_start + pos + ending.len())
        })
        .max()
        .unwrap_or(window.len())
}

/// The configured node parser.
#[derive(Debug, Clone)]
pub enum NodeParser {
    Semantic(SemanticSplitter),
    Fixed(FixedSizeSplitter),
}

impl NodeParser {
    pub fn from_settings(settings: &ChunkingSettings) -> Self {
        match settings.splitter {
            SplitterKind::Semantic => Self::Semantic(SemanticSplitter {
                buffer_size: settings.buffer_size,
                breakpoint_percentile_threshold: settings.breakpoint_percentile_threshold,
            }),
            SplitterKind::Fixed => Self::Fixed(FixedSizeSplitter {
                chunk_size: settings.chunk_size,
                chunk_overlap: settings.chunk_overlap,
            }),
        }
    }

    pub async fn parse(
        &self,
        documents: &[Document],
        embedder: &dyn Embedder,
    ) -> Result<Vec<Node>, ApiError> {
        let mut nodes = Vec::new();
        for doc in documents {
            let doc_nodes = match self {
                Self::Semantic(splitter) => splitter.split(doc, embedder).await?,
                Self::Fixed(splitter) => splitter.split(doc),
            };
            tracing::debug!("{} -> {} nodes", doc.file_path, doc_nodes.len());
            nodes.extend(doc_nodes);
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    fn doc(text: &str) -> Document {
        Document {
            doc_id: "doc-1".to_string(),
            file_name: "notes.txt".to_string(),
            file_path: "notes.txt".to_string(),
            text: text.to_string(),
            metadata: json!({ "file_name": "notes.txt" }),
        }
    }

    /// Sentences mentioning "cat" point one way, everything else the other.
    struct TopicEmbedder;

    #[async_trait]
    impl Embedder for TopicEmbedder {
        fn model_name(&self) -> &str {
            "topic"
        }

        async fn embed_documents(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
            Ok(inputs
                .iter()
                .map(|s| {
                    if s.contains("cat") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }

        async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ApiError> {
            Ok(self.embed_documents(&[query.to_string()]).await?.remove(0))
        }
    }

    #[test]
    fn sentences_split_on_terminal_punctuation_and_blank_lines() {
        let text = "First one. Second one!  Third?\n\nHeading without dot\nstill heading";
        let spans = split_sentences(text);
        let sentences: Vec<&str> = spans.iter().map(|s| &text[s.start..s.end]).collect();
        assert_eq!(
            sentences,
            vec![
                "First one.",
                "Second one!",
                "Third?",
                "Heading without dot\nstill heading"
            ]
        );
    }

    #[test]
    fn crlf_and_whitespace_lines_count_as_blank() {
        let text = "Tenant details\r\n\r\nLandlord details\n   \nSignatures";
        let spans = split_sentences(text);
        let sentences: Vec<&str> = spans.iter().map(|s| &text[s.start..s.end]).collect();
        assert_eq!(sentences, vec!["Tenant details", "Landlord details", "Signatures"]);
    }

    #[test]
    fn decimals_do_not_end_sentences() {
        let text = "Total cost was 3.50 dollars. Paid.";
        let spans = split_sentences(text);
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[0].start..spans[0].end], "Total cost was 3.50 dollars.");
    }

    #[tokio::test]
    async fn semantic_splitter_cuts_at_topic_shift() {
        let text = "The cat sat. The cat slept. The cat purred. \
                    Stocks fell sharply today. Markets were volatile overall. Bonds rallied late.";
        let splitter = SemanticSplitter {
            buffer_size: 0,
            breakpoint_percentile_threshold: 50.0,
        };

        let nodes = splitter.split(&doc(text), &TopicEmbedder).await.unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].text, "The cat sat. The cat slept. The cat purred.");
        assert!(nodes[1].text.starts_with("Stocks fell"));
        assert_eq!(nodes[1].chunk_index, 1);
        assert_eq!(&text[nodes[1].start_offset..nodes[1].end_offset], nodes[1].text);
    }

    #[tokio::test]
    async fn semantic_splitter_handles_tiny_inputs() {
        let splitter = SemanticSplitter::default();

        let empty = splitter.split(&doc("   "), &TopicEmbedder).await.unwrap();
        assert!(empty.is_empty());

        let single = splitter.split(&doc("Only one sentence."), &TopicEmbedder).await.unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].text, "Only one sentence.");
    }

    #[tokio::test]
    async fn uniform_text_stays_in_one_chunk() {
        let text = "The cat sat. The cat sat. The cat sat. The cat sat.";
        let nodes = SemanticSplitter::default()
            .split(&doc(text), &TopicEmbedder)
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].text, text);
    }

    #[test]
    fn fixed_splitter_windows_overlap() {
        let text = "This is a test. ".repeat(20);
        let splitter = FixedSizeSplitter {
            chunk_size: 100,
            chunk_overlap: 20,
        };

        let nodes = splitter.split(&doc(&text));

        assert!(nodes.len() >= 3);
        assert!(nodes.iter().all(|n| n.text.chars().count() <= 100));
        assert!(nodes.iter().all(|n| n.text.ends_with('.')));
        assert!(nodes[1].start_offset < nodes[0].end_offset);
    }

    fn assert_covers_text(text: &str, nodes: &[Node]) {
        for (i, c) in text.char_indices() {
            if c.is_whitespace() {
                continue;
            }
            assert!(
                nodes.iter().any(|n| n.start_offset <= i && i < n.end_offset),
                "byte {} ({:?}) not in any node",
                i,
                c
            );
        }
    }

    #[test]
    fn fixed_splitter_keeps_text_after_a_sentence_cut() {
        let text = format!("{}. Clause nine survives termination. {}", "a".repeat(84), "b".repeat(150));
        let splitter = FixedSizeSplitter {
            chunk_size: 100,
            chunk_overlap: 0,
        };

        let nodes = splitter.split(&doc(&text));

        assert_eq!(nodes[0].end_offset, 85);
        assert!(nodes.iter().any(|n| n.text.contains("Clause nine")));
        assert_covers_text(&text, &nodes);
    }

    #[test]
    fn fixed_splitter_covers_long_prose_with_overlap() {
        let text = "The deposit is returned within thirty days. Pets require written consent! \
                    Is subletting allowed? Only with approval. "
            .repeat(40);
        let splitter = FixedSizeSplitter {
            chunk_size: 120,
            chunk_overlap: 25,
        };

        let nodes = splitter.split(&doc(&text));

        assert!(nodes.len() > 10);
        assert_covers_text(&text, &nodes);
        assert!(nodes.windows(2).all(|w| w[0].start_offset < w[1].start_offset));
    }

    #[test]
    fn fixed_splitter_is_char_boundary_safe() {
        let text = "日本語のテキスト。".repeat(30);
        let splitter = FixedSizeSplitter {
            chunk_size: 17,
            chunk_overlap: 3,
        };

        let nodes = splitter.split(&doc(&text));
        assert!(!nodes.is_empty());
        assert_eq!(nodes.last().unwrap().end_offset, text.len());
    }

    #[test]
    fn node_ids_are_deterministic_and_carry_metadata() {
        let d = doc("Alpha. Beta.");
        let a = Node::new(&d, 0, 0, 6);
        let b = Node::new(&d, 0, 0, 6);
        let c = Node::new(&d, 1, 0, 6);

        assert_eq!(a.node_id, b.node_id);
        assert_ne!(a.node_id, c.node_id);
        assert_eq!(a.file_name(), "notes.txt");
        assert_eq!(a.metadata["chunk_index"], 0);
    }

    #[tokio::test]
    async fn parser_follows_settings() {
        let settings = ChunkingSettings {
            splitter: SplitterKind::Fixed,
            buffer_size: 1,
            breakpoint_percentile_threshold: 95.0,
            chunk_size: 10,
            chunk_overlap: 0,
        };
        let parser = NodeParser::from_settings(&settings);
        assert!(matches!(parser, NodeParser::Fixed(_)));

        let nodes = parser
            .parse(&[doc("abcdefghijklmnopqrst")], &TopicEmbedder)
            .await
            .unwrap();
        assert_eq!(nodes.len(), 2);
    }
}
