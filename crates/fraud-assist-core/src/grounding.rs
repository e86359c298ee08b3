//! Grounding and citation engine.
//!
//! Turns fused retrieval results into citations and the passages handed to
//! generation, applies the evidence sufficiency gate, and checks generated
//! content against the cited passages.

use std::collections::{BTreeSet, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::lexical::terms;
use crate::models::{Citation, QueryContext, RetrievalResult, RiskFlag};
use crate::risk::RiskRules;
use crate::store::ChunkStore;

/// Evidence policy, read from the `[grounding]` and `[risk]` config sections.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundingPolicy {
    /// Results with a fused score below this are discarded.
    pub score_threshold: f64,
    /// Excerpt length in chars before `...` is appended.
    pub excerpt_chars: usize,
    pub max_citations: usize,
    /// Share of an action's content tokens that must occur in one passage.
    pub claim_support_ratio: f64,
    pub risk: RiskRules,
}

impl Default for GroundingPolicy {
    fn default() -> Self {
        Self {
            score_threshold: 0.15,
            excerpt_chars: 200,
            max_citations: 8,
            claim_support_ratio: 0.5,
            risk: RiskRules::default(),
        }
    }
}

/// Full chunk text handed to generation, paired with a citation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub page_or_section: String,
    pub text: String,
    pub score: f64,
    /// The passage itself matched injection patterns.
    pub untrusted: bool,
}

/// Outcome of the grounding step.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundingDecision {
    pub citations: Vec<Citation>,
    pub passages: Vec<Passage>,
    pub info_not_found: bool,
    pub risk_flags: BTreeSet<RiskFlag>,
}

/// Build citations for results at or above the threshold and evaluate the
/// transaction risk rules.
pub fn ground(
    ctx: &QueryContext,
    results: &[RetrievalResult],
    store: &ChunkStore,
    policy: &GroundingPolicy,
) -> GroundingDecision {
    let risk_flags = ctx
        .transaction
        .as_ref()
        .map(|tx| policy.risk.evaluate(tx))
        .unwrap_or_default();

    let mut citations = Vec::new();
    let mut passages = Vec::new();

    for result in results
        .iter()
        .filter(|r| r.fused_score >= policy.score_threshold)
    {
        if citations.len() >= policy.max_citations {
            break;
        }
        let chunk = match store.get(&result.chunk_id) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(chunk_id = %result.chunk_id, error = %e, "result skipped");
                continue;
            }
        };
        let (title, source_path) = store
            .document(&chunk.doc_id)
            .map(|d| (d.title.clone(), d.source_path.clone()))
            .unwrap_or_else(|| (chunk.doc_id.clone(), String::new()));

        citations.push(Citation {
            chunk_id: chunk.chunk_id.clone(),
            doc_id: chunk.doc_id.clone(),
            title: title.clone(),
            page_or_section: chunk.page_or_section.clone(),
            excerpt: excerpt(&chunk.text, policy.excerpt_chars),
            score: round4(result.fused_score),
            source_path,
        });
        passages.push(Passage {
            chunk_id: chunk.chunk_id.clone(),
            doc_id: chunk.doc_id.clone(),
            title,
            page_or_section: chunk.page_or_section.clone(),
            text: chunk.text.clone(),
            score: result.fused_score,
            untrusted: false,
        });
    }

    GroundingDecision {
        info_not_found: citations.is_empty(),
        citations,
        passages,
        risk_flags,
    }
}

/// First `max_chars` chars of `text`, suffixed with `...` when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

fn content_tokens(text: &str) -> HashSet<String> {
    terms(text).into_iter().collect()
}

/// Keep the actions whose content tokens are supported by one passage.
///
/// An action is supported when at least `min_support` of its distinct
/// content tokens occur in a single passage. Actions with no content
/// tokens are dropped. Returns the kept actions and how many were removed.
pub fn validate_actions(
    actions: &[String],
    passages: &[Passage],
    min_support: f64,
) -> (Vec<String>, usize) {
    let passage_tokens: Vec<HashSet<String>> =
        passages.iter().map(|p| content_tokens(&p.text)).collect();

    let mut kept = Vec::new();
    let mut removed = 0;
    for action in actions {
        let tokens = content_tokens(action);
        let supported = !tokens.is_empty()
            && passage_tokens.iter().any(|pt| {
                let hits = tokens.iter().filter(|t| pt.contains(*t)).count();
                hits as f64 / tokens.len() as f64 >= min_support
            });
        if supported {
            kept.push(action.clone());
        } else {
            removed += 1;
        }
    }
    (kept, removed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FactKind {
    Url,
    Email,
    Phone,
    Duration,
    Amount,
}

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)[^\s<>()\[\]]+").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w.+-]+@[\w-]+(?:\.[\w-]+)+").unwrap());
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\+\d{2,3}[\s.]?|\b0)\d(?:[\s.-]?\d{2}){4}\b").unwrap());
static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)\s*(jours?|heures?|h|mois|semaines?|minutes?|min|ans?|années?|days?|hours?|weeks?|months?|years?)\b").unwrap()
});
static AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d+(?:[.,]\d+)?)\s*(?:€|eur\b|euros?\b)").unwrap());

fn duration_unit(unit: &str) -> &'static str {
    let unit = unit.to_lowercase();
    if unit.starts_with("jour") || unit.starts_with("day") {
        "d"
    } else if unit.starts_with("heure") || unit == "h" || unit.starts_with("hour") {
        "h"
    } else if unit.starts_with("semaine") || unit.starts_with("week") {
        "w"
    } else if unit == "mois" || unit.starts_with("month") {
        "mo"
    } else if unit.starts_with("min") {
        "min"
    } else {
        "y"
    }
}

fn phone_key(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.strip_prefix("33") {
        Some(rest) if raw.trim_start().starts_with('+') => format!("0{}", rest),
        _ => digits,
    }
}

/// Specific facts in `text` as `(kind, normalized key, raw text)`.
fn extract_facts(text: &str) -> Vec<(FactKind, String, String)> {
    let mut facts = Vec::new();
    for m in URL_RE.find_iter(text) {
        let raw = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', '/']);
        let key = raw.to_lowercase();
        let key = key
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string();
        facts.push((FactKind::Url, key, raw.to_string()));
    }
    for m in EMAIL_RE.find_iter(text) {
        let raw = m.as_str().trim_end_matches('.');
        facts.push((FactKind::Email, raw.to_lowercase(), raw.to_string()));
    }
    for m in PHONE_RE.find_iter(text) {
        facts.push((FactKind::Phone, phone_key(m.as_str()), m.as_str().trim().to_string()));
    }
    for c in DURATION_RE.captures_iter(text) {
        let key = format!("{}{}", &c[1], duration_unit(&c[2]));
        facts.push((FactKind::Duration, key, c[0].to_string()));
    }
    for c in AMOUNT_RE.captures_iter(text) {
        let key = c[1].replace(',', ".");
        facts.push((FactKind::Amount, key, c[0].to_string()));
    }
    facts
}

/// Specific facts (phone numbers, URLs, emails, durations, amounts) in
/// `message` that appear in none of the passages or `extra_sources`.
///
/// `extra_sources` holds caller-supplied text the message may restate,
/// such as the transaction description.
pub fn unsupported_facts(
    message: &str,
    passages: &[Passage],
    extra_sources: &[String],
) -> Vec<String> {
    let known: HashSet<(FactKind, String)> = passages
        .iter()
        .map(|p| p.text.as_str())
        .chain(extra_sources.iter().map(String::as_str))
        .flat_map(extract_facts)
        .map(|(kind, key, _)| (kind, key))
        .collect();

    let mut missing = Vec::new();
    for (kind, key, raw) in extract_facts(message) {
        if !known.contains(&(kind, key)) && !missing.contains(&raw) {
            missing.push(raw);
        }
    }
    missing
}

/// Drop every sentence of `message` that contains one of `facts`.
pub fn remove_sentences_with(message: &str, facts: &[String]) -> String {
    split_sentences(message)
        .into_iter()
        .filter(|s| !facts.iter().any(|f| s.contains(f.as_str())))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split on `.`, `!` or `?` followed by whitespace, and on newlines.
/// Dots inside URLs and decimals do not end a sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let end = match c {
            '\n' => Some(i),
            '.' | '!' | '?' => match chars.peek() {
                Some(&(_, next)) if next.is_whitespace() => Some(i + c.len_utf8()),
                None => Some(i + c.len_utf8()),
                _ => None,
            },
            _ => None,
        };
        if let Some(end) = end {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}
