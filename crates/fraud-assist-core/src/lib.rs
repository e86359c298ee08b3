//! # Fraud Assist Core
//!
//! Retrieval and grounded-answer engine for bank fraud support: data
//! models, chunking, the chunk store, BM25 and vector indexes, hybrid
//! retrieval, grounding and citations, input sanitizing, prompt
//! construction, and answer composition.
//!
//! This crate does no filesystem or network I/O. Document extraction,
//! network embedding and generation providers, configuration, and the
//! HTTP and CLI surfaces live in the `fraud-assist` crate, which plugs
//! into the [`embedding::EmbeddingProvider`] and [`generation::Generator`]
//! traits defined here.

pub mod chunk;
pub mod composer;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod grounding;
pub mod index;
pub mod lexical;
pub mod models;
pub mod prompt;
pub mod risk;
pub mod sanitizer;
pub mod search;
pub mod semantic;
pub mod store;
