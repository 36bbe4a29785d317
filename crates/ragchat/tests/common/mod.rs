//! In-process collaborators for driving the router and commands.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::Router;
use chrono::Utc;

use ragchat::config::{parse_config, Config};
use ragchat::context::{AppContext, Collaborators};
use ragchat::server::build_router;
use ragchat_core::embedding::{EmbeddingProvider, EMBEDDING_DIMENSION};
use ragchat_core::ingest::PageFetcher;
use ragchat_core::llm::LanguageModel;
use ragchat_core::models::{Agent, CrawledPage};
use ragchat_core::store::memory::{InMemoryStore, InMemoryVectorIndex};
use ragchat_core::store::{AgentStore, VectorIndex};

pub const KEY_A: &str = "key-tenant-a";
pub const KEY_B: &str = "key-tenant-b";

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
category: Misc
--- item end ---
--- item start ---
id: sku-beans
name: Coffee Beans
productUrl: https://shop.example/beans
description: Whole roasted beans.
--- item end ---
";

pub fn test_config(extra: &str) -> Config {
    parse_config(&format!(
        r#"
[db]
path = "/nonexistent/ragchat.sqlite"

[server]
request_timeout_secs = 1

[[auth.api_keys]]
key = "{}"
tenant_id = "tenant-a"
user_id = "alice"

[[auth.api_keys]]
key = "{}"
tenant_id = "tenant-b"
user_id = "bob"
{}
"#,
        KEY_A, KEY_B, extra
    ))
    .unwrap()
}

pub fn axis(index: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIMENSION];
    v[index] = 1.0;
    v
}

/// Embeds text by the first keyword it contains.
pub struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        EMBEDDING_DIMENSION
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                if lower.contains("trail") {
                    axis(0)
                } else if lower.contains("beans") {
                    axis(1)
                } else if lower.contains("returns") {
                    axis(2)
                } else {
                    axis(EMBEDDING_DIMENSION - 1)
                }
            })
            .collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn dims(&self) -> usize {
        EMBEDDING_DIMENSION
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("connection refused by embeddings.internal:443")
    }
}

pub struct CannedModel(pub &'static str);

#[async_trait]
impl LanguageModel for CannedModel {
    fn model_name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

/// Model that never answers within the request deadline.
pub struct SlowModel;

#[async_trait]
impl LanguageModel for SlowModel {
    fn model_name(&self) -> &str {
        "slow"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok("too late".to_string())
    }
}

pub struct StaticFetcher {
    pages: HashMap<String, String>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        let mut pages = HashMap::new();
        pages.insert(
            "https://docs.example/returns".to_string(),
            "Returns are free within 30 days.".to_string(),
        );
        Self { pages }
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<CrawledPage> {
        let content = self
            .pages
            .get(url)
            .ok_or_else(|| anyhow!("HTTP 404 for {}", url))?;
        Ok(CrawledPage {
            url: url.to_string(),
            domain: "docs.example".to_string(),
            title: "Returns".to_string(),
            content: content.clone(),
        })
    }
}

pub struct TestApp {
    pub ctx: Arc<AppContext>,
    pub store: Arc<InMemoryStore>,
    pub index: Arc<InMemoryVectorIndex>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(
            test_config(""),
            Arc::new(KeywordEmbedder),
            Arc::new(CannedModel("The Trail Runner costs 89.90 EUR.")),
        )
    }

    pub fn with(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        let ctx = Arc::new(AppContext::from_parts(
            config,
            Collaborators {
                knowledge_spaces: store.clone(),
                agents: store.clone(),
                conversations: store.clone(),
                vectors: Some(index.clone() as Arc<dyn VectorIndex>),
                embedder,
                llm,
                fetcher: Arc::new(StaticFetcher::new()),
            },
        ));
        let router = build_router(ctx.clone());
        Self {
            ctx,
            store,
            index,
            router,
        }
    }

    pub async fn add_agent(&self, tenant_id: &str, id: &str, knowledge_space_ids: Vec<String>, strict_rag: bool) {
        self.store
            .save_agent(&Agent {
                id: id.to_string(),
                tenant_id: tenant_id.to_string(),
                name: id.to_string(),
                knowledge_space_ids,
                strict_rag,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }
}

pub const BOUNDARY: &str = "ragchat-test-boundary";

pub fn multipart_body(name: &str, file: &str) -> String {
    format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\n{name}\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"catalog.md\"\r\n\
         Content-Type: text/markdown\r\n\r\n{file}\r\n--{b}--\r\n",
        b = BOUNDARY,
        name = name,
        file = file
    )
}

pub fn authed(method: &str, uri: &str, key: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", key))
}

pub fn json_request(method: &str, uri: &str, key: &str, body: serde_json::Value) -> Request<Body> {
    authed(method, uri, key)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn upload_request(key: &str, name: &str, file: &str) -> Request<Body> {
    authed("POST", "/v1/knowledge/create", key)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(name, file)))
        .unwrap()
}

pub async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}
