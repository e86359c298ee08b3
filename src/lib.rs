//! # Fraud Assist
//!
//! A grounded fraud-support assistant for retail banking customers.
//!
//! Bank procedure documents (Markdown or PDF) are chunked and indexed in
//! memory for hybrid search (BM25 + semantic). Each customer message is
//! sanitized, matched against the corpus, and answered only from passages
//! that clear the grounding threshold, with citations and risk flags.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  docs dir   │──▶│  Extract +  │──▶│ Index engine │
//! │  md / pdf   │   │  chunk      │   │ BM25 + dense │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐         ┌──────────┐
//!                 │   CLI    │         │   HTTP   │
//!                 │(fraudctl)│         │  /chat   │
//!                 └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! fraudctl reindex
//! fraudctl search "opposition carte" --explain
//! fraudctl ask "Un paiement inconnu sur ma carte" --channel online --amount 89.90
//! fraudctl serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`extract`] | Markdown and PDF text extraction |
//! | [`ingest`] | Docs directory walk |
//! | [`embedding`] | Remote embedding providers |
//! | [`generation`] | Remote generation providers |
//! | [`retry`] | HTTP retry with backoff |
//! | [`assistant`] | Engine, composer and providers wired together |
//! | [`server`] | HTTP API |
//! | [`ask`], [`search`], [`status`] | CLI commands |
//!
//! The retrieval and grounding logic lives in `fraud_assist_core`.

pub mod ask;
pub mod assistant;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod logging;
pub mod retry;
pub mod search;
pub mod server;
pub mod status;
