//! Configuration parsing and validation.
//!
//! The service is configured from a single TOML file (default
//! `./config/ragchat.toml`). Every section except `[db]` may be omitted
//! and falls back to the defaults below. Secrets are never read from the
//! file: the OpenAI and Qdrant clients take their keys from
//! `OPENAI_API_KEY` and `QDRANT_API_KEY`.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/ragchat.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:8787"
//! request_timeout_secs = 60
//!
//! [retrieval]
//! top_k = 5
//! similarity_threshold = 0.75
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [vector]
//! provider = "qdrant"
//! url = "http://localhost:6333"
//!
//! [[auth.api_keys]]
//! key = "dev-key"
//! tenant_id = "tenant-1"
//! user_id = "alice"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use ragchat_core::embedding::EMBEDDING_DIMENSION;
use ragchat_core::ingest::PageChunking;
use ragchat_core::retrieval::RetrievalParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Deadline for a whole request, external calls included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_max_context_chunks")]
    pub max_context_chunks: usize,
    #[serde(default = "default_max_cited_urls")]
    pub max_cited_urls: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            max_context_chunks: default_max_context_chunks(),
            max_cited_urls: default_max_cited_urls(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            top_k: self.top_k,
            similarity_threshold: self.similarity_threshold,
            max_context_chunks: self.max_context_chunks,
            max_cited_urls: self.max_cited_urls,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_similarity_threshold() -> f32 {
    0.75
}
fn default_max_context_chunks() -> usize {
    5
}
fn default_max_cited_urls() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamingConfig {
    /// Upper bound on the UTF-8 bytes of content carried by one SSE frame.
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: default_chunk_bytes(),
        }
    }
}

fn default_chunk_bytes() -> usize {
    ragchat_core::sse::DEFAULT_CHUNK_BYTES
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Web-page segment size in tokens (about four characters each).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Tokens of the previous segment repeated at the start of the next.
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl ChunkingConfig {
    pub fn page_chunking(&self) -> PageChunking {
        PageChunking {
            max_tokens: self.max_tokens,
            overlap_tokens: self.overlap_tokens,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    ragchat_core::ingest::DEFAULT_PAGE_MAX_TOKENS
}

fn default_overlap_tokens() -> usize {
    ragchat_core::ingest::DEFAULT_PAGE_OVERLAP_TOKENS
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_openai_base_url")]
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
            provider: default_disabled(),
            model: None,
            dims: None,
            base_url: default_openai_base_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            base_url: default_openai_base_url(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// `qdrant`, `memory` (process-local, lost on restart) or `disabled`.
    #[serde(default = "default_vector_provider")]
    pub provider: String,
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            url: default_qdrant_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_vector_provider() -> String {
    "memory".to_string()
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

/// One accepted credential and the identity it resolves to.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiKeyConfig {
    pub key: String,
    pub tenant_id: String,
    pub user_id: String,
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.2
}

/// Read, parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.server.request_timeout_secs == 0 {
        anyhow::bail!("server.request_timeout_secs must be > 0");
    }

    let retrieval = &config.retrieval;
    if !(-1.0..=1.0).contains(&retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [-1.0, 1.0]");
    }
    if retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if retrieval.max_context_chunks < 1 {
        anyhow::bail!("retrieval.max_context_chunks must be >= 1");
    }
    if retrieval.max_cited_urls < 1 {
        anyhow::bail!("retrieval.max_cited_urls must be >= 1");
    }

    // A frame must be able to hold any single UTF-8 scalar.
    if config.streaming.chunk_bytes < 4 {
        anyhow::bail!("streaming.chunk_bytes must be >= 4");
    }

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims != Some(EMBEDDING_DIMENSION) {
            anyhow::bail!(
                "embedding.dims must be {} when provider is '{}'",
                EMBEDDING_DIMENSION,
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }

    match config.vector.provider.as_str() {
        "disabled" | "memory" | "qdrant" => {}
        other => anyhow::bail!(
            "Unknown vector provider: '{}'. Must be disabled, memory, or qdrant.",
            other
        ),
    }

    match config.logging.format.as_str() {
        "pretty" | "json" => {}
        other => anyhow::bail!("Unknown logging format: '{}'. Must be pretty or json.", other),
    }

    for (i, key) in config.auth.api_keys.iter().enumerate() {
        if key.key.trim().is_empty() || key.tenant_id.trim().is_empty() {
            anyhow::bail!("auth.api_keys[{}] needs a non-empty key and tenant_id", i);
        }
    }

    Ok(())
}
