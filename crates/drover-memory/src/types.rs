use drover_core::{RagChunk, Result};

/// Query parameters passed to retrievers.
#[derive(Debug, Clone)]
pub struct RagQuery {
    pub text: String,
    pub top_k: usize,
}

impl RagQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
        }
    }
}

/// Pluggable retrieval source. The agent queries every configured
/// retriever at turn time and injects the results as ephemeral context.
pub trait Retriever: Send + Sync {
    fn retrieve(&self, query: &RagQuery) -> Result<Vec<RagChunk>>;
}

/// Split text into lowercase alphanumeric terms, sorted and deduplicated.
/// Shared by the in-memory store and the context database so both sides
/// of retrieval agree on tokenization.
pub(crate) fn tokenize_terms(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            terms.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        terms.push(current);
    }
    terms.sort();
    terms.dedup();
    terms
}
