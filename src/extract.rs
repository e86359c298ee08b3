//! Text extraction for the closed set of document kinds.
//!
//! PDF documents yield one section per non-blank page, labelled
//! `Page N`. Markdown documents yield one section per heading, labelled
//! with the heading text; text before the first heading is labelled
//! `Introduction`.

use fraud_assist_core::models::{DocumentKind, Section};

/// Extraction error. Never panics; ingestion logs and skips the file.
#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
    InvalidUtf8(String),
    Empty,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::InvalidUtf8(e) => write!(f, "not valid UTF-8: {}", e),
            ExtractError::Empty => write!(f, "no text found"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract labelled sections from raw document bytes.
pub fn extract(kind: DocumentKind, bytes: &[u8]) -> Result<Vec<Section>, ExtractError> {
    let sections = match kind {
        DocumentKind::Pdf => extract_pdf(bytes)?,
        DocumentKind::Markdown => {
            let text =
                std::str::from_utf8(bytes).map_err(|e| ExtractError::InvalidUtf8(e.to_string()))?;
            markdown_sections(text)
        }
    };
    if sections.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(sections)
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<Section>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| Section::new(format!("Page {}", i + 1), text.trim()))
        .collect())
}

const PREAMBLE_LABEL: &str = "Introduction";

/// Split Markdown at ATX headings (`#` to `######`). Heading lines are
/// used as labels and left out of the section text. Headings inside
/// fenced code blocks are ignored.
pub fn markdown_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut label = PREAMBLE_LABEL.to_string();
    let mut body: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }
        match heading_text(trimmed) {
            Some(heading) if !in_fence => {
                push_section(&mut sections, &label, &body);
                label = heading.to_string();
                body.clear();
            }
            _ => body.push(line),
        }
    }
    push_section(&mut sections, &label, &body);
    sections
}

fn heading_text(line: &str) -> Option<&str> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    let heading = rest.trim().trim_end_matches('#').trim();
    if heading.is_empty() {
        None
    } else {
        Some(heading)
    }
}

fn push_section(sections: &mut Vec<Section>, label: &str, body: &[&str]) {
    let text = body.join("\n");
    let text = text.trim();
    if !text.is_empty() {
        sections.push(Section::new(label, text));
    }
}
