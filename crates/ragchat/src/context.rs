//! Composition root.
//!
//! [`AppContext`] builds every collaborator once per process and wires the
//! pipelines over them. The handles are read-only after
//! construction, so one context is shared by all requests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use ragchat_core::agents::AgentRegistry;
use ragchat_core::embedding::EmbeddingProvider;
use ragchat_core::ingest::{IngestionPipeline, PageFetcher};
use ragchat_core::lifecycle::KnowledgeSpaceLifecycle;
use ragchat_core::llm::LanguageModel;
use ragchat_core::retrieval::ChatPipeline;
use ragchat_core::store::{AgentStore, ConversationStore, KnowledgeSpaceStore, VectorIndex};

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::fetcher::HttpPageFetcher;
use crate::llm::create_model;
use crate::migrate;
use crate::sqlite_store::SqliteStore;
use crate::vector::{create_index, DisabledIndex};

const FETCH_MAX_RETRIES: u32 = 2;

/// Concrete implementations of every trait the pipelines depend on.
pub struct Collaborators {
    pub knowledge_spaces: Arc<dyn KnowledgeSpaceStore>,
    pub agents: Arc<dyn AgentStore>,
    pub conversations: Arc<dyn ConversationStore>,
    /// `None` when no vector index is configured.
    pub vectors: Option<Arc<dyn VectorIndex>>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LanguageModel>,
    pub fetcher: Arc<dyn PageFetcher>,
}

pub struct AppContext {
    pub config: Arc<Config>,
    pub agents: AgentRegistry,
    pub ingestion: IngestionPipeline,
    pub chat: ChatPipeline,
    pub lifecycle: KnowledgeSpaceLifecycle,
}

impl AppContext {
    /// Open the database, run migrations and build the configured clients.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));

        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_embedder(&config.embedding)?);
        let llm: Arc<dyn LanguageModel> = Arc::from(create_model(&config.llm)?);
        let vectors = create_index(&config.vector)?;
        let fetcher = Arc::new(HttpPageFetcher::new(
            Duration::from_secs(config.server.request_timeout_secs),
            FETCH_MAX_RETRIES,
        )?);

        tracing::info!(
            embedding = %config.embedding.provider,
            llm = %config.llm.provider,
            vector = %config.vector.provider,
            db = %config.db.path.display(),
            "collaborators ready"
        );

        Ok(Self::from_parts(
            config.clone(),
            Collaborators {
                knowledge_spaces: store.clone(),
                agents: store.clone(),
                conversations: store,
                vectors,
                embedder,
                llm,
                fetcher,
            },
        ))
    }

    /// Wire the pipelines over already-built collaborators.
    pub fn from_parts(config: Config, parts: Collaborators) -> Self {
        let index: Arc<dyn VectorIndex> = match &parts.vectors {
            Some(index) => index.clone(),
            None => Arc::new(DisabledIndex),
        };

        let ingestion = IngestionPipeline::new(
            parts.knowledge_spaces.clone(),
            index.clone(),
            parts.embedder.clone(),
        )
        .with_page_fetcher(parts.fetcher, config.chunking.page_chunking());

        let chat = ChatPipeline::new(
            parts.agents.clone(),
            parts.knowledge_spaces.clone(),
            parts.conversations,
            index,
            parts.embedder,
            parts.llm,
            config.retrieval.params(),
        );

        let agents = AgentRegistry::new(parts.agents, parts.knowledge_spaces.clone());
        let lifecycle = KnowledgeSpaceLifecycle::new(parts.knowledge_spaces, parts.vectors);

        Self {
            config: Arc::new(config),
            agents,
            ingestion,
            chat,
            lifecycle,
        }
    }
}
