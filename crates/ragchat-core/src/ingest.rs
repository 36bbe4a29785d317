//! Knowledge-space ingestion.
//!
//! Two entry points share one shape: build chunk drafts, embed all draft
//! texts in a single batched call, upsert every chunk under the new
//! namespace in a single batched call, then persist the
//! [`KnowledgeSpace`] row.
//!
//! - [`IngestionPipeline::create_product_knowledge_space`] parses a product
//!   markdown file. Item-level parse failures are collected into the
//!   summary; they never abort the run.
//! - [`IngestionPipeline::create_web_knowledge_space`] fetches each URL
//!   through a [`PageFetcher`]. Per-URL failures are collected; the run
//!   fails only when every URL fails.
//!
//! The metadata row is written after the vector upsert, so a failed
//! embedding or upsert leaves no visible knowledge space behind. Such
//! failures surface as [`RagError::Dependency`] and the whole call can be
//! re-run safely (it creates a fresh knowledge space).

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::chunk::{page_drafts, product_draft, ChunkDraft};
use crate::embedding::{embed_texts, EmbeddingProvider};
use crate::error::RagError;
use crate::models::{
    CrawledPage, KnowledgeSpace, KnowledgeSpaceStatus, KnowledgeSpaceType, Namespace,
    ParseItemError,
};
use crate::parser::parse_markdown;
use crate::store::{KnowledgeSpaceStore, VectorIndex};

/// Version tag written into every ingestion metadata blob.
pub const SCHEMA_VERSION: &str = "1.0.0";

pub use crate::chunk::{PageChunking, DEFAULT_PAGE_MAX_TOKENS, DEFAULT_PAGE_OVERLAP_TOKENS};

/// Fetches a URL and extracts its readable text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<CrawledPage>;
}

#[derive(Debug, Clone)]
pub struct CreateKnowledgeSpaceInput {
    pub tenant_id: String,
    pub name: String,
    pub file_content: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateWebKnowledgeSpaceInput {
    pub tenant_id: String,
    pub name: String,
    pub source_urls: Vec<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlFailure {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionSummary {
    pub success_count: usize,
    pub failure_count: usize,
    pub errors: Vec<ParseItemError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_urls: Vec<UrlFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKnowledgeSpaceOutput {
    pub knowledge_space_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: KnowledgeSpaceType,
    pub status: KnowledgeSpaceStatus,
    pub document_count: usize,
    pub summary: IngestionSummary,
}

/// Creates knowledge spaces from product files or web pages.
pub struct IngestionPipeline {
    knowledge_spaces: Arc<dyn KnowledgeSpaceStore>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    page_chunking: PageChunking,
}

impl IngestionPipeline {
    pub fn new(
        knowledge_spaces: Arc<dyn KnowledgeSpaceStore>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            knowledge_spaces,
            vectors,
            embedder,
            fetcher: None,
            page_chunking: PageChunking::default(),
        }
    }

    /// Enable web ingestion.
    pub fn with_page_fetcher(mut self, fetcher: Arc<dyn PageFetcher>, chunking: PageChunking) -> Self {
        self.fetcher = Some(fetcher);
        self.page_chunking = chunking;
        self
    }

    /// Parse a product markdown file into a new `product` knowledge space.
    pub async fn create_product_knowledge_space(
        &self,
        input: CreateKnowledgeSpaceInput,
    ) -> Result<CreateKnowledgeSpaceOutput, RagError> {
        require_non_empty(&input.tenant_id, "tenantId")?;
        require_non_empty(&input.name, "name")?;

        let parsed = parse_markdown(&input.file_content);
        let status = KnowledgeSpaceStatus::from_counts(
            parsed.summary.success_count,
            parsed.summary.failure_count,
        );
        let namespace = new_namespace(&input.tenant_id);

        tracing::info!(
            tenant_id = %input.tenant_id,
            knowledge_space_id = %namespace.knowledge_space_id,
            request_id = input.request_id.as_deref().unwrap_or(""),
            total_items = parsed.summary.total_items,
            success_count = parsed.summary.success_count,
            failure_count = parsed.summary.failure_count,
            "ingesting product catalog"
        );

        let drafts: Vec<ChunkDraft> = parsed.products.iter().map(product_draft).collect();
        let document_count = self.embed_and_upsert(&namespace, drafts).await?;

        let summary = IngestionSummary {
            success_count: parsed.summary.success_count,
            failure_count: parsed.summary.failure_count,
            errors: parsed.errors,
            failed_urls: Vec::new(),
        };
        self.persist(
            namespace,
            &input.name,
            KnowledgeSpaceType::Product,
            Vec::new(),
            status,
            document_count,
            summary,
        )
        .await
    }

    /// Fetch every URL into a new `web` knowledge space.
    pub async fn create_web_knowledge_space(
        &self,
        input: CreateWebKnowledgeSpaceInput,
    ) -> Result<CreateKnowledgeSpaceOutput, RagError> {
        require_non_empty(&input.tenant_id, "tenantId")?;
        require_non_empty(&input.name, "name")?;
        if input.source_urls.is_empty() {
            return Err(RagError::validation("sourceUrls must not be empty"));
        }
        let fetcher = self
            .fetcher
            .as_ref()
            .ok_or_else(|| RagError::Config("web ingestion is not configured".to_string()))?;

        let namespace = new_namespace(&input.tenant_id);
        let total = input.source_urls.len();
        let mut drafts = Vec::new();
        let mut failed_urls = Vec::new();
        let mut pages = 0usize;

        for (i, url) in input.source_urls.iter().enumerate() {
            match fetcher.fetch(url).await {
                Ok(page) => {
                    let page_chunks = page_drafts(&page, self.page_chunking);
                    tracing::debug!(
                        knowledge_space_id = %namespace.knowledge_space_id,
                        url = %url,
                        url_index = i + 1,
                        total_urls = total,
                        chunk_count = page_chunks.len(),
                        "page fetched"
                    );
                    drafts.extend(page_chunks);
                    pages += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        knowledge_space_id = %namespace.knowledge_space_id,
                        url = %url,
                        url_index = i + 1,
                        total_urls = total,
                        error = %e,
                        "page fetch failed"
                    );
                    failed_urls.push(UrlFailure {
                        url: url.clone(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        if pages == 0 {
            let details: Vec<String> = failed_urls
                .iter()
                .map(|f| format!("{}: {}", f.url, f.reason))
                .collect();
            return Err(RagError::validation(format!(
                "All URLs failed to process. Failed URLs: {}. Errors: {}",
                failed_urls.len(),
                details.join("; ")
            )));
        }

        let document_count = self.embed_and_upsert(&namespace, drafts).await?;

        let status = KnowledgeSpaceStatus::from_counts(pages, failed_urls.len());
        let summary = IngestionSummary {
            success_count: pages,
            failure_count: failed_urls.len(),
            errors: Vec::new(),
            failed_urls,
        };
        self.persist(
            namespace,
            &input.name,
            KnowledgeSpaceType::Web,
            input.source_urls,
            status,
            document_count,
            summary,
        )
        .await
    }

    /// Embed every draft in one batch and upsert the resulting chunks.
    /// Returns the number of chunks written.
    async fn embed_and_upsert(
        &self,
        namespace: &Namespace,
        drafts: Vec<ChunkDraft>,
    ) -> Result<usize, RagError> {
        if drafts.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let embeddings = embed_texts(self.embedder.as_ref(), &texts)
            .await
            .map_err(|e| RagError::dependency("embedding request failed", e))?;

        let created_at = Utc::now();
        let chunks: Vec<_> = drafts
            .into_iter()
            .zip(embeddings)
            .map(|(draft, embedding)| draft.into_chunk(namespace, embedding, created_at))
            .collect();

        self.vectors
            .upsert_chunks(namespace, &chunks)
            .await
            .map_err(|e| RagError::dependency("vector upsert failed", e))?;

        tracing::info!(
            knowledge_space_id = %namespace.knowledge_space_id,
            collection = %namespace.collection_name(),
            chunk_count = chunks.len(),
            "chunks upserted"
        );
        Ok(chunks.len())
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        namespace: Namespace,
        name: &str,
        kind: KnowledgeSpaceType,
        source_urls: Vec<String>,
        status: KnowledgeSpaceStatus,
        document_count: usize,
        summary: IngestionSummary,
    ) -> Result<CreateKnowledgeSpaceOutput, RagError> {
        let source_type = match kind {
            KnowledgeSpaceType::Product => "file",
            KnowledgeSpaceType::Web => "web",
        };
        let knowledge_space = KnowledgeSpace {
            tenant_id: namespace.tenant_id,
            knowledge_space_id: namespace.knowledge_space_id,
            name: name.to_string(),
            kind,
            source_urls,
            version: namespace.version,
            created_at: Utc::now(),
            status,
            document_count,
            metadata: json!({
                "sourceType": source_type,
                "schemaVersion": SCHEMA_VERSION,
                "summary": summary,
            }),
        };

        self.knowledge_spaces
            .save(&knowledge_space)
            .await
            .map_err(|e| RagError::dependency("saving knowledge space failed", e))?;

        tracing::info!(
            tenant_id = %knowledge_space.tenant_id,
            knowledge_space_id = %knowledge_space.knowledge_space_id,
            status = %status,
            document_count,
            "knowledge space created"
        );

        Ok(CreateKnowledgeSpaceOutput {
            knowledge_space_id: knowledge_space.knowledge_space_id,
            name: knowledge_space.name,
            kind,
            status,
            document_count,
            summary,
        })
    }
}

fn require_non_empty(value: &str, field: &str) -> Result<(), RagError> {
    if value.trim().is_empty() {
        return Err(RagError::validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Fresh knowledge space id with today's UTC date as the version.
fn new_namespace(tenant_id: &str) -> Namespace {
    Namespace::new(
        tenant_id,
        Uuid::new_v4().to_string(),
        Utc::now().format("%Y-%m-%d").to_string(),
    )
}
