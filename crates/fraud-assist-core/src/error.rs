//! Error taxonomy for the core engine.
//!
//! "No evidence" is deliberately absent: an empty evidence set is a normal
//! outcome, reported as `info_not_found = true` on the response.

use thiserror::Error;

/// Errors raised by the retrieval and grounding engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unknown chunk or document id.
    #[error("not found: {0}")]
    NotFound(String),

    /// A query arrived before the first successful index build. Retryable.
    #[error("index is not ready: run a reindex first")]
    IndexUnready,

    /// The embedding capability failed for a document or a query.
    #[error("embedding unavailable for {target}: {reason}")]
    EmbeddingUnavailable { target: String, reason: String },

    /// A source document could not be turned into text.
    #[error("extraction failed for {document}: {reason}")]
    ExtractionFailure { document: String, reason: String },

    /// Two source files resolved to the same document id.
    #[error("duplicate document id: {0}")]
    DuplicateDocument(String),

    /// Retrieval did not complete within the configured bound.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// The generation capability failed.
    #[error("generation failed: {0}")]
    Generation(String),
}

impl CoreError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::IndexUnready
                | CoreError::RetrievalUnavailable(_)
                | CoreError::EmbeddingUnavailable { .. }
        )
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
