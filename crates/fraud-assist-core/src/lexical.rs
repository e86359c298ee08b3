//! BM25 lexical index.
//!
//! Okapi BM25 over chunk text with the non-negative IDF variant
//! `ln(1 + (N - n + 0.5) / (n + 0.5))`. The index is a pure function of
//! the chunk texts it was built from.
//!
//! [`terms`] is the stemmed vocabulary shared with the hashing embedder
//! and with action validation.

use std::collections::{HashMap, HashSet};

use crate::models::Chunk;

/// Term-frequency saturation.
pub const DEFAULT_K1: f64 = 1.5;
/// Length normalization.
pub const DEFAULT_B: f64 = 0.75;

const STOPWORDS: &[&str] = &[
    // fr
    "au", "aux", "avec", "ce", "ces", "cet", "cette", "dans", "de", "des", "du", "elle", "en",
    "et", "eu", "il", "ils", "je", "la", "le", "les", "leur", "lui", "ma", "mais", "me", "mes",
    "moi", "mon", "ne", "nos", "notre", "nous", "on", "ou", "par", "pas", "pour", "qu", "que",
    "qui", "sa", "se", "ses", "son", "sur", "ta", "te", "tes", "toi", "ton", "tu", "un", "une",
    "vos", "votre", "vous", "est", "sont", "été", "être", "ai", "as", "avez", "suis", "comment",
    "quand", "quoi",
    // en
    "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is", "it",
    "its", "my", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
    "you", "your", "me", "we", "our", "do", "if",
];

/// Lowercase, keep alphanumeric runs of 2+ chars, drop stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Strip a trailing plural `s`/`x` from tokens longer than 4 chars.
pub fn light_stem(token: &str) -> &str {
    if token.chars().count() > 4 {
        token
            .strip_suffix('s')
            .or_else(|| token.strip_suffix('x'))
            .unwrap_or(token)
    } else {
        token
    }
}

/// Tokens with [`light_stem`] applied, so `cartes` and `carte` match.
pub fn terms(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .map(|t| light_stem(&t).to_string())
        .collect()
}

/// BM25 parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: DEFAULT_K1,
            b: DEFAULT_B,
        }
    }
}

/// Inverted statistics over a fixed chunk list.
#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    params: Bm25Params,
    ids: Vec<String>,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<usize>,
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

impl Bm25Index {
    pub fn build(chunks: &[Chunk]) -> Self {
        Self::build_with(chunks, Bm25Params::default())
    }

    pub fn build_with(chunks: &[Chunk], params: Bm25Params) -> Self {
        let mut index = Bm25Index {
            params,
            ..Default::default()
        };

        for chunk in chunks {
            let tokens = terms(&chunk.text);
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *index.doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            index.ids.push(chunk.chunk_id.clone());
            index.doc_lens.push(tokens.len());
            index.term_freqs.push(tf);
        }

        let total: usize = index.doc_lens.iter().sum();
        index.avg_len = if index.ids.is_empty() {
            0.0
        } else {
            total as f64 / index.ids.len() as f64
        };
        index
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        let total = self.ids.len() as f64;
        (1.0 + (total - n + 0.5) / (n + 0.5)).ln()
    }

    /// Top `top_k` chunks with a positive score, descending. Ties keep
    /// insertion order.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        if self.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let query_terms: Vec<String> = terms(query)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        if query_terms.is_empty() {
            return Vec::new();
        }

        let idfs: Vec<f64> = query_terms.iter().map(|t| self.idf(t)).collect();
        let Bm25Params { k1, b } = self.params;
        let avg_len = if self.avg_len > 0.0 { self.avg_len } else { 1.0 };

        let mut scored: Vec<(usize, f64)> = Vec::new();
        for (i, tf_map) in self.term_freqs.iter().enumerate() {
            let len_norm = 1.0 - b + b * self.doc_lens[i] as f64 / avg_len;
            let mut score = 0.0;
            for (term, idf) in query_terms.iter().zip(&idfs) {
                if let Some(&tf) = tf_map.get(term) {
                    let tf = tf as f64;
                    score += idf * (tf * (k1 + 1.0)) / (tf + k1 * len_norm);
                }
            }
            if score > 0.0 {
                scored.push((i, score));
            }
        }

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
            .into_iter()
            .map(|(i, score)| (self.ids[i].clone(), score))
            .collect()
    }
}
