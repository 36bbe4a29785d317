//! Embedding provider implementations.
//!
//! - **[`DisabledEmbedder`]**: fails every call; used when
//!   `embedding.provider = "disabled"`.
//! - **[`OpenAIEmbedder`]**: calls an OpenAI-compatible
//!   `POST {base_url}/embeddings` endpoint in batches of
//!   `embedding.batch_size`, with the retry policy from [`crate::retry`].
//!
//! Batches are sent sequentially and their results concatenated, so the
//! output order always matches the input order.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ragchat_core::embedding::EmbeddingProvider;

use crate::config::EmbeddingConfig;
use crate::retry::{error_for_status, send_with_retry};

/// Embedder that refuses to embed anything.
pub struct DisabledEmbedder;

#[async_trait]
impl EmbeddingProvider for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

/// Embedding provider using the OpenAI embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is missing from the config or
    /// `OPENAI_API_KEY` is not set.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build embedding HTTP client")?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model,
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn embed_one_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingsRequest {
            model: &self.model,
            input: texts,
        };

        let response = send_with_retry("OpenAI embeddings", self.max_retries, || {
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        let response = error_for_status("OpenAI embeddings", response).await?;

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .context("Invalid OpenAI embeddings response")?;
        parsed.into_vectors(texts.len())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_one_batch(batch).await?);
        }
        tracing::debug!(model = %self.model, count = vectors.len(), "embedded texts");
        Ok(vectors)
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl EmbeddingsResponse {
    /// Vectors in input order; the API may return `data` unordered.
    fn into_vectors(self, expected_len: usize) -> Result<Vec<Vec<f32>>> {
        anyhow::ensure!(
            self.data.len() == expected_len,
            "OpenAI returned {} embeddings for {} inputs",
            self.data.len(),
            expected_len
        );
        let mut data = self.data;
        data.sort_by_key(|d| d.index.unwrap_or(0));
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Create the embedder selected by `embedding.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        "openai" => Ok(Box::new(OpenAIEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
