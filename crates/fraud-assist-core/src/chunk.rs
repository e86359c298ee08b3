//! Paragraph-boundary text chunker.
//!
//! Splits each section of a [`Document`] into [`Chunk`]s that respect a
//! configurable `max_tokens` limit. Sections (Markdown headings, PDF pages)
//! are chunked independently, so a chunk never straddles two of them.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split the section text on `\n\n` paragraph boundaries.
//! 3. Accumulate paragraphs into a buffer until adding the next paragraph
//!    would exceed `max_chars`, then flush the buffer as a chunk.
//! 4. If a single paragraph exceeds `max_chars`, split it at the last
//!    sentence end inside the window, else the last newline, else the last
//!    space, else at a UTF-8 char boundary.
//! 5. Drop pieces shorter than `min_chunk_chars`.
//!
//! # Example
//!
//! ```rust
//! use fraud_assist_core::chunk::{chunk_document, ChunkParams};
//! use fraud_assist_core::models::{Document, DocumentKind, Section};
//!
//! let doc = Document::from_stem(
//!     "guide",
//!     "docs/guide.md",
//!     DocumentKind::Markdown,
//!     vec![Section::new("Opposition", "Faites opposition sans attendre.\n\nAppelez le service.")],
//! );
//! let chunks = chunk_document(&doc, &ChunkParams::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].page_or_section, "Opposition");
//! ```

use sha2::{Digest, Sha256};

use crate::models::{Chunk, Document};

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Length of the hex-encoded chunk id.
const CHUNK_ID_LEN: usize = 24;

/// Chunking knobs, read from the `[chunking]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub max_tokens: usize,
    pub min_chunk_chars: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_tokens: 125,
            min_chunk_chars: 20,
        }
    }
}

/// Estimated token count of a piece of text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Chunk every section of `doc`, numbering chunks contiguously from 0
/// across the whole document.
pub fn chunk_document(doc: &Document, params: &ChunkParams) -> Vec<Chunk> {
    let max_chars = params.max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();

    for section in &doc.sections {
        for piece in split_section(&section.text, max_chars) {
            if piece.chars().count() < params.min_chunk_chars {
                continue;
            }
            let ordinal = chunks.len();
            chunks.push(make_chunk(&doc.doc_id, ordinal, &section.label, &piece));
        }
    }

    chunks
}

/// Split one section into pieces of at most `max_chars` bytes.
fn split_section(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            split_oversized(trimmed, max_chars, &mut pieces);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
}

fn split_oversized(paragraph: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let window_end = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
        let split_at = if window_end >= remaining.len() {
            remaining.len()
        } else {
            let window = &remaining[..window_end];
            last_sentence_end(window)
                .or_else(|| window.rfind('\n').map(|pos| pos + 1))
                .or_else(|| window.rfind(' ').map(|pos| pos + 1))
                .unwrap_or(window_end)
        };
        // Always make progress, even when the first char is wider than the window.
        let split_at = if split_at == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

/// Byte offset just past the last `.`, `!` or `?` followed by whitespace.
fn last_sentence_end(window: &str) -> Option<usize> {
    let mut found = None;
    let mut chars = window.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    found = Some(i + c.len_utf8());
                }
            }
        }
    }
    found
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Content-derived chunk id: identical content at the same position keeps
/// its id across reindexes.
pub fn chunk_id(doc_id: &str, ordinal: usize, text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let content_hash = sha256_hex(&normalized);
    let mut id = sha256_hex(&format!("{}|{}|{}", doc_id, ordinal, content_hash));
    id.truncate(CHUNK_ID_LEN);
    id
}

fn make_chunk(doc_id: &str, ordinal: usize, label: &str, text: &str) -> Chunk {
    Chunk {
        chunk_id: chunk_id(doc_id, ordinal, text),
        doc_id: doc_id.to_string(),
        ordinal,
        text: text.to_string(),
        page_or_section: label.to_string(),
        token_count: estimate_tokens(text),
    }
}
