//! In-memory lexical RAG store with JSON persistence.
//!
//! Deterministic, dependency-light baseline retriever: an inverted index
//! over lowercased alphanumeric terms with a cosine-like overlap score.
//! Serves as the application-facing document store next to the durable
//! conversation archive in [`ContextDatabase`](crate::ContextDatabase).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use drover_core::{RagChunk, Result};

use crate::error::MemoryError;
use crate::types::{tokenize_terms, RagQuery, Retriever};

/// A stored chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub id: String,
    pub content: String,
    pub source: Option<String>,
}

#[derive(Default)]
struct StoreInner {
    chunks: Vec<ChunkRecord>,
    chunk_terms: Vec<HashSet<String>>,
    id_to_index: HashMap<String, usize>,
    inverted_index: HashMap<String, Vec<usize>>,
}

/// Thread-safe in-memory store; reads take a shared lock so retrieval
/// from the inference thread never contends with other readers.
#[derive(Default)]
pub struct RagStore {
    inner: RwLock<StoreInner>,
}

/// On-disk shape: `{"chunks":[{"id","content","source"}...]}`.
#[derive(Serialize, Deserialize)]
struct PersistedStore {
    chunks: Vec<PersistedChunk>,
}

#[derive(Serialize, Deserialize)]
struct PersistedChunk {
    id: String,
    content: String,
    #[serde(default)]
    source: String,
}

impl RagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a chunk and update the retrieval index.
    pub fn add_chunk(&self, record: ChunkRecord) -> std::result::Result<(), MemoryError> {
        if record.id.is_empty() {
            return Err(MemoryError::InvalidInput("chunk id cannot be empty".into()));
        }
        if record.content.is_empty() {
            return Err(MemoryError::InvalidInput(
                "chunk content cannot be empty".into(),
            ));
        }

        let mut inner = self.inner.write().unwrap();
        match inner.id_to_index.get(&record.id).copied() {
            Some(idx) => {
                inner.erase_terms(idx);
                inner.chunks[idx] = record;
                inner.index_terms(idx);
            }
            None => {
                let idx = inner.chunks.len();
                inner.id_to_index.insert(record.id.clone(), idx);
                inner.chunks.push(record);
                inner.chunk_terms.push(HashSet::new());
                inner.index_terms(idx);
            }
        }
        Ok(())
    }

    /// Slice a document into overlapping chunks (`<source_id>:<n>` ids)
    /// and index them.
    pub fn add_document(
        &self,
        source_id: &str,
        text: &str,
        chunk_size_chars: usize,
        overlap_chars: usize,
    ) -> std::result::Result<usize, MemoryError> {
        if source_id.is_empty() {
            return Err(MemoryError::InvalidInput("source_id cannot be empty".into()));
        }
        if text.is_empty() {
            return Err(MemoryError::InvalidInput("document text cannot be empty".into()));
        }
        if chunk_size_chars == 0 || overlap_chars >= chunk_size_chars {
            return Err(MemoryError::InvalidInput(
                "chunk overlap must be smaller than chunk size".into(),
            ));
        }

        let chars: Vec<char> = text.chars().collect();
        let step = chunk_size_chars - overlap_chars;
        let mut pos = 0;
        let mut chunk_index = 0;
        while pos < chars.len() {
            let len = chunk_size_chars.min(chars.len() - pos);
            let content: String = chars[pos..pos + len].iter().collect();
            self.add_chunk(ChunkRecord {
                id: format!("{source_id}:{chunk_index}"),
                content,
                source: Some(source_id.to_string()),
            })?;
            chunk_index += 1;
            if pos + len >= chars.len() {
                break;
            }
            pos += step;
        }
        Ok(chunk_index)
    }

    /// Persist all chunks as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> std::result::Result<(), MemoryError> {
        let inner = self.inner.read().unwrap();
        let persisted = PersistedStore {
            chunks: inner
                .chunks
                .iter()
                .map(|c| PersistedChunk {
                    id: c.id.clone(),
                    content: c.content.clone(),
                    source: c.source.clone().unwrap_or_default(),
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&persisted)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load chunks from JSON, replacing current contents and rebuilding
    /// the index. Entries without an id or content are skipped.
    pub fn load(&self, path: impl AsRef<Path>) -> std::result::Result<(), MemoryError> {
        let json = std::fs::read_to_string(path)?;
        let persisted: PersistedStore = serde_json::from_str(&json)?;

        self.clear();
        for chunk in persisted.chunks {
            if chunk.id.is_empty() || chunk.content.is_empty() {
                continue;
            }
            self.add_chunk(ChunkRecord {
                id: chunk.id,
                content: chunk.content,
                source: if chunk.source.is_empty() {
                    None
                } else {
                    Some(chunk.source)
                },
            })?;
        }
        Ok(())
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        *inner = StoreInner::default();
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Retriever for RagStore {
    /// Top-k retrieval with a lexical cosine score:
    /// `overlap / sqrt(|query_terms| * max(1, |chunk_terms|))`.
    /// Ties break by insertion order (stable).
    fn retrieve(&self, query: &RagQuery) -> Result<Vec<RagChunk>> {
        let query_terms = tokenize_terms(&query.text);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }
        let top_k = query.top_k.max(1);

        let inner = self.inner.read().unwrap();
        let mut overlap_count: HashMap<usize, usize> = HashMap::new();
        for term in &query_terms {
            if let Some(postings) = inner.inverted_index.get(term) {
                for &idx in postings {
                    *overlap_count.entry(idx).or_default() += 1;
                }
            }
        }

        let mut candidates: Vec<(usize, f64)> = overlap_count
            .into_iter()
            .map(|(idx, overlap)| {
                let denom = ((query_terms.len() as f64)
                    * (inner.chunk_terms[idx].len().max(1) as f64))
                    .sqrt();
                (idx, overlap as f64 / denom)
            })
            .collect();

        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        Ok(candidates
            .into_iter()
            .take(top_k)
            .map(|(idx, score)| {
                let chunk = &inner.chunks[idx];
                RagChunk {
                    id: chunk.id.clone(),
                    content: chunk.content.clone(),
                    score,
                    source: chunk.source.clone(),
                }
            })
            .collect())
    }
}

impl StoreInner {
    fn erase_terms(&mut self, idx: usize) {
        let terms = std::mem::take(&mut self.chunk_terms[idx]);
        for term in &terms {
            if let Some(postings) = self.inverted_index.get_mut(term) {
                postings.retain(|&i| i != idx);
                if postings.is_empty() {
                    self.inverted_index.remove(term);
                }
            }
        }
    }

    fn index_terms(&mut self, idx: usize) {
        let terms = tokenize_terms(&self.chunks[idx].content);
        for term in terms {
            self.chunk_terms[idx].insert(term.clone());
            self.inverted_index.entry(term).or_default().push(idx);
        }
    }
}
