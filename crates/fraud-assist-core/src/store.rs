//! In-memory chunk store.
//!
//! Holds the chunks and document provenance of one index snapshot. The
//! store is built once per reindex and never mutated while queries read it;
//! concurrency is handled one level up by swapping whole snapshots.

use std::collections::HashMap;

use tracing::debug;

use crate::chunk::{chunk_document, ChunkParams};
use crate::error::{CoreError, CoreResult};
use crate::models::{Chunk, Document, DocumentMeta};

/// Chunks in insertion order plus an id lookup table.
#[derive(Debug, Default, Clone)]
pub struct ChunkStore {
    params: ChunkParams,
    docs: HashMap<String, DocumentMeta>,
    doc_order: Vec<String>,
    chunks: Vec<Chunk>,
    by_id: HashMap<String, usize>,
}

impl ChunkStore {
    pub fn new(params: ChunkParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    /// Chunk `doc` and append its chunks. Returns the new chunks.
    pub fn add_document(&mut self, doc: &Document) -> CoreResult<Vec<Chunk>> {
        if self.docs.contains_key(&doc.doc_id) {
            return Err(CoreError::DuplicateDocument(doc.doc_id.clone()));
        }

        let chunks = chunk_document(doc, &self.params);
        for chunk in &chunks {
            self.by_id.insert(chunk.chunk_id.clone(), self.chunks.len());
            self.chunks.push(chunk.clone());
        }

        self.docs.insert(
            doc.doc_id.clone(),
            DocumentMeta {
                doc_id: doc.doc_id.clone(),
                title: doc.title.clone(),
                source_path: doc.source_path.clone(),
                kind: doc.kind,
            },
        );
        self.doc_order.push(doc.doc_id.clone());

        debug!(doc_id = %doc.doc_id, chunks = chunks.len(), "document chunked");
        Ok(chunks)
    }

    pub fn get(&self, chunk_id: &str) -> CoreResult<&Chunk> {
        self.by_id
            .get(chunk_id)
            .map(|&i| &self.chunks[i])
            .ok_or_else(|| CoreError::NotFound(chunk_id.to_string()))
    }

    /// All chunks in insertion order.
    pub fn all(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn clear(&mut self) {
        self.docs.clear();
        self.doc_order.clear();
        self.chunks.clear();
        self.by_id.clear();
    }

    pub fn document(&self, doc_id: &str) -> Option<&DocumentMeta> {
        self.docs.get(doc_id)
    }

    /// Documents in insertion order.
    pub fn documents(&self) -> impl Iterator<Item = &DocumentMeta> {
        self.doc_order.iter().filter_map(|id| self.docs.get(id))
    }

    pub fn document_count(&self) -> usize {
        self.docs.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks_for(&self, doc_id: &str) -> impl Iterator<Item = &Chunk> {
        let doc_id = doc_id.to_string();
        self.chunks.iter().filter(move |c| c.doc_id == doc_id)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
