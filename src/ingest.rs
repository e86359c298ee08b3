//! Document loading: scan the docs directory and extract every supported
//! file into a [`Document`].
//!
//! Files are visited in relative-path order so document order, and with
//! it chunk order, is stable across runs. A file that fails extraction is
//! logged and reported, and the rest of the corpus is still loaded.
//!
//! A document id is the file's path relative to the docs directory,
//! without extension (`cartes/faq`). When two files still resolve to the
//! same id (`guide.md` and `guide.pdf`), the first in path order is kept
//! and the other is reported as a duplicate.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use fraud_assist_core::error::CoreError;
use fraud_assist_core::models::{Document, DocumentKind};

use crate::config::DocsConfig;
use crate::extract::extract;

/// Documents loaded from disk plus the files that could not be read.
#[derive(Debug, Default)]
pub struct LoadedCorpus {
    pub documents: Vec<Document>,
    pub failures: Vec<CoreError>,
}

impl LoadedCorpus {
    /// Failure messages, for reports.
    pub fn failure_messages(&self) -> Vec<String> {
        self.failures.iter().map(|e| e.to_string()).collect()
    }
}

pub fn load_documents(docs: &DocsConfig) -> Result<LoadedCorpus> {
    let root = &docs.dir;
    if !root.exists() {
        bail!("Docs directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&docs.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string()];
    default_excludes.extend(docs.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(docs.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push((rel_str, path.to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut corpus = LoadedCorpus::default();
    let mut seen = HashSet::new();
    for (rel_str, path) in files {
        match load_document(&path, &rel_str) {
            Ok(Some(doc)) if !seen.insert(doc.doc_id.clone()) => {
                warn!(doc_id = %doc.doc_id, path = %rel_str, "duplicate document id, skipped");
                corpus.failures.push(CoreError::DuplicateDocument(format!(
                    "{} ({})",
                    doc.doc_id, rel_str
                )));
            }
            Ok(Some(doc)) => {
                debug!(doc_id = %doc.doc_id, sections = doc.sections.len(), "document loaded");
                corpus.documents.push(doc);
            }
            Ok(None) => debug!(path = %rel_str, "unsupported file kind, skipped"),
            Err(e) => {
                warn!(error = %e, "document skipped");
                corpus.failures.push(e);
            }
        }
    }
    Ok(corpus)
}

/// Load one file, `relative` being its path under the docs directory.
/// `Ok(None)` for extensions outside the supported kinds.
pub fn load_document(path: &Path, relative: &str) -> Result<Option<Document>, CoreError> {
    let kind = match path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(DocumentKind::from_extension)
    {
        Some(kind) => kind,
        None => return Ok(None),
    };
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let failure = |reason: String| CoreError::ExtractionFailure {
        document: path.display().to_string(),
        reason,
    };

    let bytes = std::fs::read(path).map_err(|e| failure(e.to_string()))?;
    let sections = extract(kind, &bytes).map_err(|e| failure(e.to_string()))?;

    let mut doc = Document::from_stem(&stem, path.display().to_string(), kind, sections);
    doc.doc_id = doc_id_for(relative);
    Ok(Some(doc))
}

/// `cartes/faq.md` becomes `cartes/faq`.
fn doc_id_for(relative: &str) -> String {
    let relative = relative.trim_start_matches("./");
    match relative.rfind('.') {
        Some(dot) if dot > relative.rfind('/').map_or(0, |s| s + 1) => relative[..dot].to_string(),
        _ => relative.to_string(),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
