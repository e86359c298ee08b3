//! Generation capability: the [`Generator`] trait, the structured context
//! handed to it, JSON answer parsing, and an offline extractive generator.
//!
//! Network generators (Ollama chat) live in the `fraud-assist` app crate.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::grounding::Passage;
use crate::models::{RiskFlag, TransactionContext};

/// Structured signals passed next to the prompts.
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    pub passages: Vec<Passage>,
    pub risk_flags: BTreeSet<RiskFlag>,
    pub is_untrusted: bool,
    pub info_not_found: bool,
    pub transaction: Option<TransactionContext>,
}

/// Trait for generation backends.
///
/// Returns the raw completion; the composer parses and validates it.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the backend/model identifier.
    fn name(&self) -> &str;
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        ctx: &GenerationContext,
    ) -> CoreResult<String>;
}

/// The JSON object a generator is asked to produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    #[serde(default)]
    pub customer_message: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub missing_info_questions: Vec<String>,
    #[serde(default)]
    pub info_not_found: bool,
}

static FENCED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").unwrap());

/// Parse a completion: the whole text, then each fenced code block, then
/// the span from the first `{` to the last `}`.
pub fn parse_json_response(raw: &str) -> Option<GeneratedAnswer> {
    if let Ok(answer) = serde_json::from_str::<GeneratedAnswer>(raw.trim()) {
        return Some(answer);
    }

    for caps in FENCED_RE.captures_iter(raw) {
        if let Ok(answer) = serde_json::from_str::<GeneratedAnswer>(&caps[1]) {
            return Some(answer);
        }
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<GeneratedAnswer>(&raw[start..=end]).ok()
}

/// Max actions the extractive generator emits.
const MAX_ACTIONS: usize = 8;

static LIST_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+(.+?)\s*$").unwrap());

/// Offline generator that answers by quoting the best-ranked procedure.
///
/// Actions are the list items of the top-ranked document's passages, in
/// rank order. It never produces text absent from the passages apart from
/// fixed framing sentences.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveGenerator;

impl ExtractiveGenerator {
    pub fn answer(&self, ctx: &GenerationContext) -> GeneratedAnswer {
        let mut questions = Vec::new();
        match ctx.transaction {
            None => questions.push(
                "Par quel moyen l'opération a-t-elle été réalisée (carte, virement, prélèvement, chèque) ?"
                    .to_string(),
            ),
            Some(ref tx) if tx.amount.is_none() => {
                questions.push("Quel est le montant de l'opération concernée ?".to_string())
            }
            Some(_) => {}
        }

        let top = match ctx.passages.first() {
            Some(p) if !ctx.info_not_found => p,
            _ => {
                return GeneratedAnswer {
                    customer_message: String::new(),
                    actions: Vec::new(),
                    missing_info_questions: questions,
                    info_not_found: true,
                }
            }
        };

        let mut seen = HashSet::new();
        let actions: Vec<String> = ctx
            .passages
            .iter()
            .filter(|p| p.doc_id == top.doc_id)
            .flat_map(|p| p.text.lines())
            .filter_map(|line| LIST_ITEM_RE.captures(line).map(|c| c[1].to_string()))
            .filter(|a| seen.insert(a.to_lowercase()))
            .take(MAX_ACTIONS)
            .collect();

        let mut message = format!(
            "D'après la documentation « {} » ({}) :",
            top.title, top.page_or_section
        );
        if let Some(lead) = lead_sentence(&top.text) {
            message.push(' ');
            message.push_str(lead);
        }
        if !actions.is_empty() {
            message.push_str(" Voici les étapes à suivre.");
        }
        if ctx.risk_flags.contains(&RiskFlag::SensitiveDataShared) {
            message.push_str(
                " Ne communiquez jamais vos données de carte complètes ni vos codes, y compris à nos services.",
            );
        }

        GeneratedAnswer {
            customer_message: message,
            actions,
            missing_info_questions: questions,
            info_not_found: false,
        }
    }
}

/// First sentence of the first prose line of a passage.
fn lead_sentence(text: &str) -> Option<&str> {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !LIST_ITEM_RE.is_match(l) && !l.starts_with('#'))?;
    let end = line
        .char_indices()
        .find(|&(i, c)| {
            matches!(c, '.' | '!' | '?')
                && line[i + c.len_utf8()..]
                    .chars()
                    .next()
                    .map_or(true, char::is_whitespace)
        })
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(line.len());
    Some(&line[..end])
}

#[async_trait]
impl Generator for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn generate(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        ctx: &GenerationContext,
    ) -> CoreResult<String> {
        serde_json::to_string(&self.answer(ctx))
            .map_err(|e| crate::error::CoreError::Generation(e.to_string()))
    }
}
