//! Document question answering backend.
//!
//! Users upload documents into an isolated session workspace; the documents
//! are split semantically, embedded and indexed in a per-session SQLite
//! vector store. Questions are answered by retrieving and reranking the most
//! relevant chunks and synthesizing an answer with a selectable hosted LLM.

pub mod core;
pub mod documents;
pub mod export;
pub mod history;
pub mod llm;
pub mod models;
pub mod rag;
pub mod server;
pub mod state;
pub mod vector_math;
pub mod workspace;
