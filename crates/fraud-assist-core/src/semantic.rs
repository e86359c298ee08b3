//! Brute-force vector index over chunk embeddings.

use tracing::debug;

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::{CoreError, CoreResult};
use crate::models::Chunk;

/// One embedding per chunk, in chunk insertion order.
#[derive(Debug, Clone, Default)]
pub struct SemanticIndex {
    model: String,
    dims: usize,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl SemanticIndex {
    /// Embed every chunk through `embedder`, `batch_size` texts per call.
    ///
    /// Batches never span two documents, so a failure can name the
    /// document whose chunks could not be embedded.
    pub async fn build(
        chunks: &[Chunk],
        embedder: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> CoreResult<Self> {
        let batch_size = batch_size.max(1);
        let dims = embedder.dims();
        let mut index = SemanticIndex {
            model: embedder.model_name().to_string(),
            dims,
            ids: Vec::with_capacity(chunks.len()),
            vectors: Vec::with_capacity(chunks.len()),
        };

        for doc_chunks in chunks.chunk_by(|a, b| a.doc_id == b.doc_id) {
            let doc_id = &doc_chunks[0].doc_id;
            let fail = |reason: String| CoreError::EmbeddingUnavailable {
                target: format!("document {}", doc_id),
                reason,
            };

            for batch in doc_chunks.chunks(batch_size) {
                let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                let vectors = embedder
                    .embed(&texts)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                if vectors.len() != batch.len() {
                    return Err(fail(format!(
                        "expected {} vectors, got {}",
                        batch.len(),
                        vectors.len()
                    )));
                }
                for (chunk, vector) in batch.iter().zip(vectors) {
                    if vector.len() != dims {
                        return Err(fail(format!(
                            "expected {} dims, got {}",
                            dims,
                            vector.len()
                        )));
                    }
                    index.ids.push(chunk.chunk_id.clone());
                    index.vectors.push(vector);
                }
            }
            debug!(doc_id = %doc_id, chunks = doc_chunks.len(), "document embedded");
        }

        Ok(index)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Top `top_k` chunks by cosine similarity clamped to `[0, 1]`,
    /// descending. Ties keep insertion order.
    pub fn search(&self, query_vec: &[f32], top_k: usize) -> Vec<(String, f64)> {
        if self.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, (cosine_similarity(query_vec, v) as f64).clamp(0.0, 1.0)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
            .into_iter()
            .map(|(i, s)| (self.ids[i].clone(), s))
            .collect()
    }
}
