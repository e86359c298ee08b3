//! Index engine: owns the current immutable index snapshot.
//!
//! Queries clone the snapshot `Arc` under a brief read lock and run to
//! completion against it. A reindex builds a complete new snapshot without
//! holding any lock, then publishes it with a single pointer swap. When two
//! reindexes overlap, the last one to publish wins.

use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::info;

use crate::chunk::ChunkParams;
use crate::embedding::EmbeddingProvider;
use crate::error::{CoreError, CoreResult};
use crate::lexical::Bm25Index;
use crate::models::Document;
use crate::semantic::SemanticIndex;
use crate::store::ChunkStore;

/// Chunks plus both indexes, built together and never mutated afterwards.
#[derive(Debug)]
pub struct IndexSnapshot {
    pub store: ChunkStore,
    pub lexical: Bm25Index,
    pub semantic: SemanticIndex,
}

/// Build-time settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub chunking: ChunkParams,
    /// Texts per embedding request.
    pub batch_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chunking: ChunkParams::default(),
            batch_size: 32,
        }
    }
}

/// Result of a reindex call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub documents_indexed: usize,
    pub chunks_indexed: usize,
    /// `false` when the content was unchanged and the snapshot was kept.
    pub rebuilt: bool,
}

/// Liveness and readiness of the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub index_ready: bool,
    pub chunk_count: usize,
    pub document_count: usize,
    pub embedding_model: String,
}

pub struct IndexEngine {
    snapshot: RwLock<Option<Arc<IndexSnapshot>>>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: EngineSettings,
}

impl IndexEngine {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, settings: EngineSettings) -> Self {
        Self {
            snapshot: RwLock::new(None),
            embedder,
            settings,
        }
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    fn current(&self) -> Option<Arc<IndexSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The current snapshot, or `IndexUnready` before the first build.
    pub fn snapshot(&self) -> CoreResult<Arc<IndexSnapshot>> {
        self.current().ok_or(CoreError::IndexUnready)
    }

    /// Rebuild the index from `documents`.
    ///
    /// Without `force`, identical content (same chunk ids and labels in
    /// the same order, same document metadata) keeps the current snapshot
    /// and skips embedding entirely. On
    /// any failure the previous snapshot stays in place.
    pub async fn reindex(&self, documents: &[Document], force: bool) -> CoreResult<ReindexReport> {
        let mut store = ChunkStore::new(self.settings.chunking);
        for doc in documents {
            store.add_document(doc)?;
        }

        if !force {
            if let Some(current) = self.current() {
                if same_content(&current.store, &store) {
                    info!(
                        documents = store.document_count(),
                        chunks = store.chunk_count(),
                        "index unchanged, rebuild skipped"
                    );
                    return Ok(ReindexReport {
                        documents_indexed: store.document_count(),
                        chunks_indexed: store.chunk_count(),
                        rebuilt: false,
                    });
                }
            }
        }

        let lexical = Bm25Index::build(store.all());
        let semantic =
            SemanticIndex::build(store.all(), self.embedder.as_ref(), self.settings.batch_size)
                .await?;

        let report = ReindexReport {
            documents_indexed: store.document_count(),
            chunks_indexed: store.chunk_count(),
            rebuilt: true,
        };

        let next = Arc::new(IndexSnapshot {
            store,
            lexical,
            semantic,
        });
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Some(next);

        info!(
            documents = report.documents_indexed,
            chunks = report.chunks_indexed,
            model = self.embedder.model_name(),
            "index published"
        );
        Ok(report)
    }

    /// Readiness and counts. The model is the one the live snapshot was
    /// embedded with, or the configured one before the first build.
    pub fn health(&self) -> HealthReport {
        let current = self.current();
        HealthReport {
            index_ready: current.is_some(),
            chunk_count: current.as_ref().map_or(0, |s| s.store.chunk_count()),
            document_count: current.as_ref().map_or(0, |s| s.store.document_count()),
            embedding_model: current
                .as_ref()
                .map_or(self.embedder.model_name(), |s| s.semantic.model())
                .to_string(),
        }
    }
}

fn same_content(a: &ChunkStore, b: &ChunkStore) -> bool {
    a.chunk_count() == b.chunk_count()
        && a.document_count() == b.document_count()
        && a.all()
            .iter()
            .zip(b.all())
            .all(|(x, y)| x.chunk_id == y.chunk_id && x.page_or_section == y.page_or_section)
        && a.documents().eq(b.documents())
}
