//! Fake collaborators shared by the pipeline tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use ragchat_core::embedding::{Embedding, EmbeddingProvider, EMBEDDING_DIMENSION};
use ragchat_core::ingest::{IngestionPipeline, PageChunking, PageFetcher};
use ragchat_core::lifecycle::KnowledgeSpaceLifecycle;
use ragchat_core::llm::LanguageModel;
use ragchat_core::models::{Agent, Chunk, CrawledPage, Namespace, ScoredChunk};
use ragchat_core::retrieval::{ChatPipeline, RetrievalParams};
use ragchat_core::store::memory::{InMemoryStore, InMemoryVectorIndex};
use ragchat_core::store::{AgentStore, VectorIndex, VectorIndexError};

pub fn axis(index: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIMENSION];
    v[index] = 1.0;
    v
}

/// Unit vector with cosine `similarity` to `axis(index)`.
pub fn near(index: usize, similarity: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIMENSION];
    v[index] = similarity;
    v[(index + 1) % EMBEDDING_DIMENSION] = (1.0 - similarity * similarity).sqrt();
    v
}

/// Maps text to a vector by the first rule whose key the text contains.
pub struct KeywordEmbedder {
    rules: Vec<(String, Vec<f32>)>,
    pub calls: Mutex<usize>,
}

impl KeywordEmbedder {
    pub fn new(rules: Vec<(&str, Vec<f32>)>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        EMBEDDING_DIMENSION
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        *self.calls.lock().unwrap() += 1;
        Ok(texts
            .iter()
            .map(|t| {
                self.rules
                    .iter()
                    .find(|(key, _)| t.contains(key.as_str()))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(|| axis(EMBEDDING_DIMENSION - 1))
            })
            .collect())
    }
}

/// Always returns vectors of the wrong length.
pub struct ShortEmbedder;

#[async_trait]
impl EmbeddingProvider for ShortEmbedder {
    fn model_name(&self) -> &str {
        "short"
    }

    fn dims(&self) -> usize {
        3
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

pub struct RecordingModel {
    pub answer: String,
    pub prompts: Mutex<Vec<String>>,
}

impl RecordingModel {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for RecordingModel {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }
}

/// Vector index whose writes always fail.
pub struct BrokenIndex;

#[async_trait]
impl VectorIndex for BrokenIndex {
    async fn upsert_chunks(&self, _namespace: &Namespace, _chunks: &[Chunk]) -> Result<()> {
        bail!("qdrant unavailable")
    }

    async fn query(
        &self,
        _namespace: &Namespace,
        _vector: &Embedding,
        _top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        bail!("qdrant unavailable")
    }

    async fn delete_collection(&self, _namespace: &Namespace) -> Result<(), VectorIndexError> {
        Err(VectorIndexError::Other(anyhow!("qdrant unavailable")))
    }
}

/// Returns a fixed hit list for every query.
pub struct ScriptedIndex {
    pub hits: Vec<ScoredChunk>,
}

#[async_trait]
impl VectorIndex for ScriptedIndex {
    async fn upsert_chunks(&self, _namespace: &Namespace, _chunks: &[Chunk]) -> Result<()> {
        Ok(())
    }

    async fn query(
        &self,
        _namespace: &Namespace,
        _vector: &Embedding,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let mut hits = self.hits.clone();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_collection(&self, _namespace: &Namespace) -> Result<(), VectorIndexError> {
        Ok(())
    }
}

pub struct MapFetcher {
    pages: HashMap<String, String>,
}

impl MapFetcher {
    pub fn new(pages: Vec<(&str, &str)>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|(u, c)| (u.to_string(), c.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl PageFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<CrawledPage> {
        let content = self
            .pages
            .get(url)
            .ok_or_else(|| anyhow!("HTTP 404 for {}", url))?;
        Ok(CrawledPage {
            url: url.to_string(),
            domain: "docs.example".to_string(),
            title: format!("Page {}", url),
            content: content.clone(),
        })
    }
}

/// All pipelines wired over one set of in-memory collaborators.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub index: Arc<InMemoryVectorIndex>,
    pub model: Arc<RecordingModel>,
    pub ingestion: IngestionPipeline,
    pub chat: ChatPipeline,
    pub lifecycle: KnowledgeSpaceLifecycle,
}

impl Harness {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        let model = Arc::new(RecordingModel::new("It costs 89.90 EUR."));

        let ingestion = IngestionPipeline::new(store.clone(), index.clone(), embedder.clone())
            .with_page_fetcher(
                Arc::new(MapFetcher::new(vec![
                    ("https://docs.example/a", "Returns are free.\n\nShipping takes 2 days."),
                    ("https://docs.example/b", "Support is open 9 to 5."),
                ])),
                PageChunking::default(),
            );
        let chat = ChatPipeline::new(
            store.clone(),
            store.clone(),
            store.clone(),
            index.clone(),
            embedder,
            model.clone(),
            RetrievalParams::default(),
        );
        let lifecycle = KnowledgeSpaceLifecycle::new(
            store.clone(),
            Some(index.clone() as Arc<dyn VectorIndex>),
        );

        Self {
            store,
            index,
            model,
            ingestion,
            chat,
            lifecycle,
        }
    }

    pub async fn add_agent(&self, id: &str, knowledge_space_ids: Vec<String>, strict_rag: bool) {
        self.store
            .save_agent(&Agent {
                id: id.to_string(),
                tenant_id: "tenant-1".to_string(),
                name: id.to_string(),
                knowledge_space_ids,
                strict_rag,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }
}

pub const CATALOG: &str = "\
--- item start ---
id: sku-trail
name: Trail Runner
price: 89.90
currency: EUR
productUrl: https://shop.example/trail
### description
Lightweight trail running shoe.
--- item end ---
--- item start ---
id: sku-box
name: Mystery Box
category: Misc
--- item end ---
--- item start ---
id: sku-beans
name: Coffee Beans
productUrl: https://shop.example/beans
description: Whole roasted beans.
--- item end ---
";
