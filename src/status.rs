//! `fraudctl reindex` and `fraudctl health` output.

use anyhow::Result;

use crate::assistant::{Assistant, AssistantHealth, IngestReport};

/// Rebuild the index from the docs directory and print the report.
pub async fn run_reindex(assistant: &Assistant, force: bool, json: bool) -> Result<()> {
    let report = assistant.reindex(force).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_report(&report));
    }
    Ok(())
}

/// Build the index and print readiness, counts and provider names.
pub async fn run_health(assistant: &Assistant, json: bool) -> Result<()> {
    assistant.reindex(false).await?;
    let health = assistant.health();
    if json {
        println!("{}", serde_json::to_string_pretty(&health)?);
    } else {
        print!("{}", format_health(&health));
    }
    Ok(())
}

pub fn format_report(report: &IngestReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("documents indexed: {}\n", report.documents_indexed));
    out.push_str(&format!("chunks indexed: {}\n", report.chunks_indexed));
    out.push_str(&format!(
        "rebuilt: {}\n",
        if report.rebuilt { "yes" } else { "no (unchanged)" }
    ));
    out.push_str(&format!("elapsed: {}ms\n", report.processing_time_ms));
    if !report.errors.is_empty() {
        out.push_str(&format!("errors: {}\n", report.errors.len()));
        for e in &report.errors {
            out.push_str(&format!("  - {}\n", e));
        }
    }
    out
}

pub fn format_health(health: &AssistantHealth) -> String {
    let mut out = String::from("Fraud Assist Status\n===================\n\n");
    out.push_str(&format!(
        "  Index:       {}\n",
        if health.index_ready { "ready" } else { "not built" }
    ));
    out.push_str(&format!("  Documents:   {}\n", health.document_count));
    out.push_str(&format!("  Chunks:      {}\n", health.chunk_count));
    out.push_str(&format!("  Embedding:   {}\n", health.embedding_model));
    out.push_str(&format!("  Generator:   {}\n", health.generator));
    if let Some(at) = health.last_indexed_at {
        out.push_str(&format!(
            "  Indexed at:  {}\n",
            at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    out
}
