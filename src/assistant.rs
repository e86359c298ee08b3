//! The assistant: config, index engine, and composer wired together.
//!
//! This is the single entry point shared by the HTTP server and the CLI.
//! It loads documents from disk for a reindex and bounds the retrieval
//! half of each answer with `retrieval.timeout_ms`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use fraud_assist_core::composer::{AnswerComposer, Prepared};
use fraud_assist_core::embedding::EmbeddingProvider;
use fraud_assist_core::error::{CoreError, CoreResult};
use fraud_assist_core::generation::Generator;
use fraud_assist_core::grounding::excerpt;
use fraud_assist_core::index::IndexEngine;
use fraud_assist_core::models::{AgentResponse, DocumentMeta, QueryContext, RetrievalResult};
use fraud_assist_core::search::HybridRetriever;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::generation::create_generator;
use crate::ingest::load_documents;

/// Outcome of a reindex run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub documents_indexed: usize,
    pub chunks_indexed: usize,
    pub rebuilt: bool,
    /// Files that could not be extracted; they are absent from the index.
    pub errors: Vec<String>,
    pub indexed_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantHealth {
    pub index_ready: bool,
    pub chunk_count: usize,
    pub document_count: usize,
    pub embedding_model: String,
    pub generator: String,
    pub last_indexed_at: Option<DateTime<Utc>>,
}

/// One ranked chunk, for retrieval debugging.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub result: RetrievalResult,
    pub doc_id: String,
    pub title: String,
    pub page_or_section: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub chunk_count: usize,
}

pub struct Assistant {
    config: Config,
    engine: Arc<IndexEngine>,
    composer: AnswerComposer,
    generator_name: String,
    last_indexed_at: RwLock<Option<DateTime<Utc>>>,
}

impl Assistant {
    /// Build the assistant with the providers named in the config.
    pub fn new(config: Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Ok(Self::with_providers(config, embedder, generator))
    }

    pub fn with_providers(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let engine = Arc::new(IndexEngine::new(embedder, config.engine_settings()));
        let generator_name = generator.name().to_string();
        let composer = AnswerComposer::new(engine.clone(), generator, config.composer_settings());
        Self {
            config,
            engine,
            composer,
            generator_name,
            last_indexed_at: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load the docs directory and rebuild the index.
    ///
    /// Unreadable files are reported in [`IngestReport::errors`]; the index
    /// is still built from the remaining documents.
    pub async fn reindex(&self, force: bool) -> Result<IngestReport> {
        let started = Instant::now();
        let corpus = load_documents(&self.config.docs)?;
        let report = self.engine.reindex(&corpus.documents, force).await?;

        let now = Utc::now();
        *self
            .last_indexed_at
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(now);

        let report = IngestReport {
            documents_indexed: report.documents_indexed,
            chunks_indexed: report.chunks_indexed,
            rebuilt: report.rebuilt,
            errors: corpus.failure_messages(),
            indexed_at: now,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            documents = report.documents_indexed,
            chunks = report.chunks_indexed,
            rebuilt = report.rebuilt,
            errors = report.errors.len(),
            elapsed_ms = report.processing_time_ms,
            "reindex finished"
        );
        Ok(report)
    }

    /// Answer one request. Only `IndexUnready` is returned as an error.
    pub async fn answer(&self, ctx: &QueryContext) -> CoreResult<AgentResponse> {
        match self.prepare(ctx).await {
            Ok(prepared) => Ok(self.composer.compose(prepared).await),
            Err(CoreError::IndexUnready) => Err(CoreError::IndexUnready),
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "retrieval failed, degrading");
                Ok(self.composer.unavailable_response(ctx))
            }
        }
    }

    /// The retrieval half of [`answer`](Self::answer), bounded by
    /// `retrieval.timeout_ms`.
    pub async fn prepare(&self, ctx: &QueryContext) -> CoreResult<Prepared> {
        let timeout_ms = self.config.retrieval.timeout_ms;
        tokio::time::timeout(Duration::from_millis(timeout_ms), self.composer.prepare(ctx))
            .await
            .unwrap_or_else(|_| {
                Err(CoreError::RetrievalUnavailable(format!(
                    "no result within {} ms",
                    timeout_ms
                )))
            })
    }

    /// Run hybrid retrieval for `query` as given, without expansion.
    pub async fn search(&self, query: &str) -> CoreResult<Vec<SearchHit>> {
        let snapshot = self.engine.snapshot()?;
        let retriever =
            HybridRetriever::new(&snapshot.lexical, &snapshot.semantic, self.engine.embedder());
        let results = retriever
            .retrieve(query, &self.config.retrieval_params())
            .await?;

        let mut hits = Vec::with_capacity(results.len());
        for result in results {
            let chunk = snapshot.store.get(&result.chunk_id)?;
            let title = snapshot
                .store
                .document(&chunk.doc_id)
                .map(|d| d.title.clone())
                .unwrap_or_else(|| chunk.doc_id.clone());
            hits.push(SearchHit {
                doc_id: chunk.doc_id.clone(),
                title,
                page_or_section: chunk.page_or_section.clone(),
                excerpt: excerpt(&chunk.text, self.config.grounding.excerpt_chars),
                result,
            });
        }
        Ok(hits)
    }

    /// Indexed documents in load order.
    pub fn documents(&self) -> CoreResult<Vec<DocumentSummary>> {
        let snapshot = self.engine.snapshot()?;
        Ok(snapshot
            .store
            .documents()
            .map(|meta| DocumentSummary {
                chunk_count: snapshot.store.chunks_for(&meta.doc_id).count(),
                meta: meta.clone(),
            })
            .collect())
    }

    pub fn health(&self) -> AssistantHealth {
        let h = self.engine.health();
        AssistantHealth {
            index_ready: h.index_ready,
            chunk_count: h.chunk_count,
            document_count: h.document_count,
            embedding_model: h.embedding_model,
            generator: self.generator_name.clone(),
            last_indexed_at: *self
                .last_indexed_at
                .read()
                .unwrap_or_else(|e| e.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fraud_assist_core::embedding::HashingEmbedder;
    use fraud_assist_core::generation::ExtractiveGenerator;
    use fraud_assist_core::models::RiskFlag;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(dir: &std::path::Path, timeout_ms: u64) -> Config {
        let toml_str = format!(
            "[docs]\ndir = \"{}\"\n[retrieval]\ntimeout_ms = {}\n",
            dir.display(),
            timeout_ms
        );
        toml::from_str(&toml_str).unwrap()
    }

    fn write_corpus(dir: &std::path::Path) {
        fs::write(
            dir.join("opposition_carte.md"),
            "# Faire opposition\n\nEn cas de paiement par carte non reconnu, faites opposition sans attendre.\n\n\
             - Faites opposition sur votre carte bancaire depuis l'application.\n",
        )
        .unwrap();
    }

    /// Embeds documents instantly, then stalls on every later call.
    struct StallingEmbedder {
        inner: HashingEmbedder,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for StallingEmbedder {
        fn model_name(&self) -> &str {
            "stalling"
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
            let n = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n > 0 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            self.inner.embed(texts).await
        }
    }

    #[tokio::test]
    async fn test_reindex_then_answer() {
        let tmp = TempDir::new().unwrap();
        write_corpus(tmp.path());
        let assistant = Assistant::new(config_for(tmp.path(), 5_000)).unwrap();

        assert!(matches!(
            assistant.answer(&QueryContext::new("opposition")).await,
            Err(CoreError::IndexUnready)
        ));

        let report = assistant.reindex(false).await.unwrap();
        assert_eq!(report.documents_indexed, 1);
        assert!(report.rebuilt);
        assert!(report.errors.is_empty());

        let health = assistant.health();
        assert!(health.index_ready);
        assert_eq!(health.generator, "extractive");
        assert!(health.last_indexed_at.is_some());

        let response = assistant
            .answer(&QueryContext::new("Je veux faire opposition sur ma carte"))
            .await
            .unwrap();
        assert!(!response.info_not_found);
        assert_eq!(response.citations[0].doc_id, "opposition_carte");

        let docs = assistant.documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].chunk_count, health.chunk_count);
    }

    #[tokio::test]
    async fn test_search_hits_carry_provenance() {
        let tmp = TempDir::new().unwrap();
        write_corpus(tmp.path());
        let assistant = Assistant::new(config_for(tmp.path(), 5_000)).unwrap();
        assistant.reindex(false).await.unwrap();

        let hits = assistant.search("opposition carte").await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].doc_id, "opposition_carte");
        assert_eq!(hits[0].page_or_section, "Faire opposition");
        assert!(assistant.search("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_timeout_degrades() {
        let tmp = TempDir::new().unwrap();
        write_corpus(tmp.path());
        let embedder = Arc::new(StallingEmbedder {
            inner: HashingEmbedder::default(),
            calls: Default::default(),
        });
        let assistant = Assistant::with_providers(
            config_for(tmp.path(), 50),
            embedder,
            Arc::new(ExtractiveGenerator),
        );
        assistant.reindex(false).await.unwrap();

        let ctx = QueryContext::new("opposition carte");
        let err = assistant.prepare(&ctx).await.unwrap_err();
        assert!(matches!(err, CoreError::RetrievalUnavailable(_)));
        assert!(err.to_string().contains("50 ms"));

        let response = assistant.answer(&ctx).await.unwrap();
        assert!(response.info_not_found);
        assert!(response.risk_flags.contains(&RiskFlag::TechnicalIssue));
        assert!(response.citations.is_empty());
    }
}
