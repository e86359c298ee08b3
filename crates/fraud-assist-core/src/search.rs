//! Hybrid retrieval: semantic and BM25 results fused into one ranking.
//!
//! # Fusion Algorithm
//!
//! 1. Embed the query and fetch `top_k_semantic` vector hits.
//! 2. Fetch `top_k_bm25` lexical hits.
//! 3. Min-max normalize the BM25 scores over the lexical result set.
//! 4. Merge: `fused = w × semantic + (1 - w) × normalized_bm25`, where a
//!    side that missed the chunk contributes 0.
//! 5. Sort by fused (desc), semantic (desc, absent lowest), chunk id (asc).

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::{CoreError, CoreResult};
use crate::lexical::Bm25Index;
use crate::models::RetrievalResult;
use crate::semantic::SemanticIndex;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetrievalParams {
    pub top_k_semantic: usize,
    pub top_k_bm25: usize,
    /// Weight `w` of the semantic side, in `[0, 1]`.
    pub semantic_weight: f64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k_semantic: 5,
            top_k_bm25: 3,
            semantic_weight: 0.7,
        }
    }
}

/// Queries both indexes of one snapshot and fuses their results.
pub struct HybridRetriever<'a> {
    lexical: &'a Bm25Index,
    semantic: &'a SemanticIndex,
    embedder: &'a dyn EmbeddingProvider,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(
        lexical: &'a Bm25Index,
        semantic: &'a SemanticIndex,
        embedder: &'a dyn EmbeddingProvider,
    ) -> Self {
        Self {
            lexical,
            semantic,
            embedder,
        }
    }

    /// Run a hybrid query. A blank query returns nothing without calling
    /// the embedder.
    pub async fn retrieve(
        &self,
        query: &str,
        params: &RetrievalParams,
    ) -> CoreResult<Vec<RetrievalResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embed_query(query).await?;
        let semantic_hits = self.semantic.search(&query_vec, params.top_k_semantic);
        let lexical_hits = self.lexical.search(query, params.top_k_bm25);

        debug!(
            semantic = semantic_hits.len(),
            lexical = lexical_hits.len(),
            weight = params.semantic_weight,
            "hybrid candidates"
        );

        Ok(fuse(&semantic_hits, &lexical_hits, params.semantic_weight))
    }

    async fn embed_query(&self, query: &str) -> CoreResult<Vec<f32>> {
        let fail = |reason: String| CoreError::EmbeddingUnavailable {
            target: format!("query \"{}\"", preview(query)),
            reason,
        };
        let mut vectors = self
            .embedder
            .embed(&[query.to_string()])
            .await
            .map_err(|e| fail(e.to_string()))?;
        match vectors.pop() {
            Some(v) if vectors.is_empty() => Ok(v),
            _ => Err(fail("provider returned no vector".to_string())),
        }
    }
}

fn preview(query: &str) -> String {
    let mut p: String = query.chars().take(60).collect();
    if p.len() < query.len() {
        p.push_str("...");
    }
    p
}

/// Fuse semantic and lexical hit lists into one ranking.
///
/// Each chunk appears at most once. `weight` is used as-is, so `0.0`
/// reproduces the lexical ordering and `1.0` the semantic ordering (up to
/// tie-breaking).
pub fn fuse(
    semantic: &[(String, f64)],
    lexical: &[(String, f64)],
    weight: f64,
) -> Vec<RetrievalResult> {
    let lexical_raw: Vec<f64> = lexical.iter().map(|(_, s)| *s).collect();
    let lexical_norm = normalize_scores(&lexical_raw);

    let mut order: Vec<&str> = Vec::new();
    let mut merged: HashMap<&str, (Option<f64>, Option<f64>, f64)> = HashMap::new();

    for (id, score) in semantic {
        if !merged.contains_key(id.as_str()) {
            order.push(id);
            merged.insert(id, (Some(*score), None, 0.0));
        }
    }
    for ((id, raw), norm) in lexical.iter().zip(lexical_norm) {
        let entry = merged.entry(id.as_str()).or_insert_with(|| {
            order.push(id);
            (None, None, 0.0)
        });
        if entry.1.is_none() {
            entry.1 = Some(*raw);
            entry.2 = norm;
        }
    }

    let mut results: Vec<RetrievalResult> = order
        .into_iter()
        .filter_map(|id| {
            merged.get(id).map(|&(sem, bm25, norm)| RetrievalResult {
                chunk_id: id.to_string(),
                semantic_score: sem,
                bm25_score: bm25,
                fused_score: weight * sem.unwrap_or(0.0) + (1.0 - weight) * norm,
            })
        })
        .collect();

    results.sort_by(compare_results);
    results
}

fn compare_results(a: &RetrievalResult, b: &RetrievalResult) -> Ordering {
    b.fused_score
        .partial_cmp(&a.fused_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            let sa = a.semantic_score.unwrap_or(f64::NEG_INFINITY);
            let sb = b.semantic_score.unwrap_or(f64::NEG_INFINITY);
            sb.partial_cmp(&sa).unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let s_min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    scores
        .iter()
        .map(|s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}
