//! TOML configuration.
//!
//! Every section except `[docs]` is optional and falls back to defaults.
//! See `config/fraud.example.toml` for a complete file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use fraud_assist_core::chunk::ChunkParams;
use fraud_assist_core::composer::ComposerSettings;
use fraud_assist_core::grounding::GroundingPolicy;
use fraud_assist_core::index::EngineSettings;
use fraud_assist_core::models::Channel;
use fraud_assist_core::risk::RiskRules;
use fraud_assist_core::sanitizer::{MatchPolicy, SanitizerConfig};
use fraud_assist_core::search::RetrievalParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub docs: DocsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub sanitizer: SanitizerSection,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocsConfig {
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.markdown".to_string(),
        "**/*.pdf".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            min_chunk_chars: default_min_chunk_chars(),
        }
    }
}

fn default_max_tokens() -> usize {
    125
}
fn default_min_chunk_chars() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k_semantic")]
    pub top_k_semantic: usize,
    #[serde(default = "default_top_k_bm25")]
    pub top_k_bm25: usize,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    /// Bound on sanitize + retrieve + ground for one request.
    #[serde(default = "default_retrieval_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k_semantic: default_top_k_semantic(),
            top_k_bm25: default_top_k_bm25(),
            semantic_weight: default_semantic_weight(),
            timeout_ms: default_retrieval_timeout_ms(),
        }
    }
}

fn default_top_k_semantic() -> usize {
    5
}
fn default_top_k_bm25() -> usize {
    3
}
fn default_semantic_weight() -> f64 {
    0.7
}
fn default_retrieval_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroundingConfig {
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
    #[serde(default = "default_max_citations")]
    pub max_citations: usize,
    #[serde(default = "default_claim_support_ratio")]
    pub claim_support_ratio: f64,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            score_threshold: default_score_threshold(),
            excerpt_chars: default_excerpt_chars(),
            max_citations: default_max_citations(),
            claim_support_ratio: default_claim_support_ratio(),
        }
    }
}

fn default_score_threshold() -> f64 {
    0.15
}
fn default_excerpt_chars() -> usize {
    200
}
fn default_max_citations() -> usize {
    8
}
fn default_claim_support_ratio() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    #[serde(default = "default_high_amount_threshold")]
    pub high_amount_threshold: f64,
    #[serde(default = "default_high_risk_channels")]
    pub high_risk_channels: Vec<String>,
    #[serde(default = "default_home_country")]
    pub home_country: String,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            high_amount_threshold: default_high_amount_threshold(),
            high_risk_channels: default_high_risk_channels(),
            home_country: default_home_country(),
        }
    }
}

fn default_high_amount_threshold() -> f64 {
    1000.0
}
fn default_high_risk_channels() -> Vec<String> {
    vec!["virement".to_string()]
}
fn default_home_country() -> String {
    "FR".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SanitizerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub policy: MatchPolicy,
}

impl Default for SanitizerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: MatchPolicy::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            base_url: default_ollama_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_num_predict")]
    pub num_predict: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            base_url: default_ollama_url(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            num_predict: default_num_predict(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "extractive".to_string()
}
fn default_generation_model() -> String {
    "mistral".to_string()
}
fn default_temperature() -> f64 {
    0.1
}
fn default_top_p() -> f64 {
    0.9
}
fn default_num_predict() -> u32 {
    2048
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            chunking: ChunkParams {
                max_tokens: self.chunking.max_tokens,
                min_chunk_chars: self.chunking.min_chunk_chars,
            },
            batch_size: self.embedding.batch_size,
        }
    }

    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            top_k_semantic: self.retrieval.top_k_semantic,
            top_k_bm25: self.retrieval.top_k_bm25,
            semantic_weight: self.retrieval.semantic_weight,
        }
    }

    pub fn composer_settings(&self) -> ComposerSettings {
        ComposerSettings {
            retrieval: self.retrieval_params(),
            grounding: GroundingPolicy {
                score_threshold: self.grounding.score_threshold,
                excerpt_chars: self.grounding.excerpt_chars,
                max_citations: self.grounding.max_citations,
                claim_support_ratio: self.grounding.claim_support_ratio,
                risk: RiskRules {
                    high_amount_threshold: self.risk.high_amount_threshold,
                    high_risk_channels: self
                        .risk
                        .high_risk_channels
                        .iter()
                        .map(|c| Channel::parse(c))
                        .collect(),
                    home_country: self.risk.home_country.clone(),
                },
            },
            sanitizer: SanitizerConfig {
                enabled: self.sanitizer.enabled,
                policy: self.sanitizer.policy,
            },
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    // Retrieval
    if config.retrieval.top_k_semantic < 1 || config.retrieval.top_k_bm25 < 1 {
        bail!("retrieval.top_k_semantic and retrieval.top_k_bm25 must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.semantic_weight) {
        bail!("retrieval.semantic_weight must be in [0.0, 1.0]");
    }
    if config.retrieval.timeout_ms == 0 {
        bail!("retrieval.timeout_ms must be > 0");
    }

    // Grounding
    if !(0.0..=1.0).contains(&config.grounding.score_threshold) {
        bail!("grounding.score_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.grounding.claim_support_ratio) {
        bail!("grounding.claim_support_ratio must be in [0.0, 1.0]");
    }
    if config.grounding.max_citations == 0 {
        bail!("grounding.max_citations must be > 0");
    }

    // Embedding
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "hashing" => {}
        "ollama" | "openai" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hashing, ollama, or openai.",
            other
        ),
    }

    // Generation
    match config.generation.provider.as_str() {
        "extractive" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be extractive or ollama.",
            other
        ),
    }

    Ok(())
}
