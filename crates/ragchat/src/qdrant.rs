//! [`VectorIndex`] over the Qdrant REST API.
//!
//! Each [`Namespace`] maps to one Qdrant collection named by
//! [`Namespace::collection_name`]. Collections are created on first upsert
//! with the fixed embedding size and cosine distance. Chunk fields other
//! than the vector travel in the point payload.
//!
//! The `api-key` header is sent when `QDRANT_API_KEY` is set.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use ragchat_core::embedding::{Embedding, EMBEDDING_DIMENSION};
use ragchat_core::models::{Chunk, ChunkMetadata, Namespace, ScoredChunk};
use ragchat_core::store::{VectorIndex, VectorIndexError};

use crate::config::VectorConfig;
use crate::retry::{error_for_status, send_with_retry};

pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
    /// Collections known to exist, to skip the existence check.
    known: Mutex<HashSet<String>>,
}

impl QdrantIndex {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        anyhow::ensure!(
            config.url.starts_with("http://") || config.url.starts_with("https://"),
            "vector.url must be an http(s) URL"
        );

        let mut headers = HeaderMap::new();
        if let Ok(key) = std::env::var("QDRANT_API_KEY") {
            if !key.trim().is_empty() {
                headers.insert(
                    "api-key",
                    HeaderValue::from_str(key.trim()).context("invalid Qdrant API key")?,
                );
            }
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .context("failed to build Qdrant HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            known: Mutex::new(HashSet::new()),
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}", self.base_url, collection)
    }

    fn is_known(&self, collection: &str) -> Result<bool> {
        let known = self
            .known
            .lock()
            .map_err(|_| anyhow!("qdrant collection cache poisoned"))?;
        Ok(known.contains(collection))
    }

    fn set_known(&self, collection: &str, present: bool) -> Result<()> {
        let mut known = self
            .known
            .lock()
            .map_err(|_| anyhow!("qdrant collection cache poisoned"))?;
        if present {
            known.insert(collection.to_string());
        } else {
            known.remove(collection);
        }
        Ok(())
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        if self.is_known(collection)? {
            return Ok(());
        }

        let url = self.collection_url(collection);
        let existing = send_with_retry("Qdrant", self.max_retries, || self.client.get(&url)).await?;
        if existing.status().is_success() {
            return self.set_known(collection, true);
        }
        if existing.status() != StatusCode::NOT_FOUND {
            error_for_status("Qdrant", existing).await?;
        }

        let body = CreateCollection {
            vectors: VectorParams {
                size: EMBEDDING_DIMENSION,
                distance: "Cosine",
            },
        };
        let response =
            send_with_retry("Qdrant", self.max_retries, || self.client.put(&url).json(&body))
                .await?;
        // A concurrent creator may have won the race.
        if response.status() != StatusCode::CONFLICT {
            error_for_status("Qdrant", response).await?;
        }
        tracing::info!(collection, "created qdrant collection");
        self.set_known(collection, true)
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert_chunks(&self, namespace: &Namespace, chunks: &[Chunk]) -> Result<()> {
        let collection = namespace.collection_name();
        self.ensure_collection(&collection).await?;

        let body = UpsertPoints {
            points: chunks.iter().map(Point::from_chunk).collect(),
        };
        let url = format!("{}/points?wait=true", self.collection_url(&collection));
        let response =
            send_with_retry("Qdrant", self.max_retries, || self.client.put(&url).json(&body))
                .await?;
        error_for_status("Qdrant", response).await?;

        tracing::debug!(collection = %collection, count = chunks.len(), "upserted points");
        Ok(())
    }

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &Embedding,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let collection = namespace.collection_name();
        let body = SearchRequest {
            vector: vector.as_slice(),
            limit: top_k,
            with_payload: true,
            with_vector: true,
        };
        let url = format!("{}/points/search", self.collection_url(&collection));
        let response =
            send_with_retry("Qdrant", self.max_retries, || self.client.post(&url).json(&body))
                .await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(collection = %collection, "query against missing collection");
            return Ok(Vec::new());
        }
        let response = error_for_status("Qdrant", response).await?;

        let parsed: SearchResponse = response
            .json()
            .await
            .context("Invalid Qdrant search response")?;
        parsed
            .result
            .into_iter()
            .map(ScoredPoint::into_scored_chunk)
            .collect()
    }

    async fn delete_collection(&self, namespace: &Namespace) -> Result<(), VectorIndexError> {
        let collection = namespace.collection_name();
        let url = self.collection_url(&collection);
        let response =
            send_with_retry("Qdrant", self.max_retries, || self.client.delete(&url)).await?;
        self.set_known(&collection, false)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(VectorIndexError::CollectionNotFound(collection));
        }
        let response = error_for_status("Qdrant", response).await?;
        let parsed: DeleteResponse = response
            .json()
            .await
            .context("Invalid Qdrant delete response")?;
        // Older servers answer `{"result": false}` instead of 404.
        if !parsed.result {
            return Err(VectorIndexError::CollectionNotFound(collection));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: &'static str,
}

#[derive(Serialize)]
struct UpsertPoints<'a> {
    points: Vec<Point<'a>>,
}

#[derive(Serialize)]
struct Point<'a> {
    id: &'a str,
    vector: &'a [f32],
    payload: PointPayload,
}

impl<'a> Point<'a> {
    fn from_chunk(chunk: &'a Chunk) -> Self {
        Self {
            id: &chunk.id,
            vector: chunk.embedding.as_slice(),
            payload: PointPayload {
                tenant_id: chunk.tenant_id.clone(),
                knowledge_space_id: chunk.knowledge_space_id.clone(),
                url: chunk.url.clone(),
                source_label: chunk.source_label.clone(),
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                created_at: chunk.created_at,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointPayload {
    tenant_id: String,
    knowledge_space_id: String,
    url: String,
    source_label: String,
    text: String,
    metadata: ChunkMetadata,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    with_vector: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    payload: PointPayload,
    vector: Vec<f32>,
}

impl ScoredPoint {
    fn into_scored_chunk(self) -> Result<ScoredChunk> {
        let id = match self.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        let embedding = Embedding::new(self.vector)?;
        Ok(ScoredChunk {
            chunk: Chunk {
                id,
                tenant_id: self.payload.tenant_id,
                knowledge_space_id: self.payload.knowledge_space_id,
                url: self.payload.url,
                source_label: self.payload.source_label,
                text: self.payload.text,
                embedding,
                metadata: self.payload.metadata,
                created_at: self.payload.created_at,
            },
            score: self.score,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    result: bool,
}
