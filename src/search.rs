//! `fraudctl search`: inspect hybrid retrieval for a query.
//!
//! The index is built from the docs directory first, then the query is
//! run as given, without sanitizing or expansion. `--explain` adds the
//! semantic and BM25 components of each fused score.

use anyhow::Result;

use crate::assistant::{Assistant, SearchHit};

pub async fn run_search(assistant: &Assistant, query: &str, explain: bool, json: bool) -> Result<()> {
    assistant.reindex(false).await?;
    let hits = assistant.search(query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        print!("{}", format_hit(i, hit, explain));
    }
    Ok(())
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{:.4}", s))
}

pub fn format_hit(index: usize, hit: &SearchHit, explain: bool) -> String {
    let mut out = format!(
        "{}. [{:.4}] {} / {}\n",
        index + 1,
        hit.result.fused_score,
        hit.title,
        hit.page_or_section
    );
    if explain {
        out.push_str(&format!(
            "    semantic: {}  bm25: {}\n",
            format_score(hit.result.semantic_score),
            format_score(hit.result.bm25_score)
        ));
    }
    out.push_str(&format!(
        "    excerpt: \"{}\"\n",
        hit.excerpt.replace('\n', " ").trim()
    ));
    out.push_str(&format!("    chunk: {}\n\n", hit.result.chunk_id));
    out
}
