//! Storage abstraction for ragchat.
//!
//! Four traits cover everything the pipelines persist or query:
//!
//! | Trait | Holds |
//! |-------|-------|
//! | [`VectorIndex`] | Embedded chunks, one collection per [`Namespace`] |
//! | [`KnowledgeSpaceStore`] | [`KnowledgeSpace`] aggregates, tenant-scoped |
//! | [`AgentStore`] | [`Agent`] definitions, tenant-scoped |
//! | [`ConversationStore`] | Append-only log of completed chat turns |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! [`memory`] provides in-memory implementations of all four.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::embedding::Embedding;
use crate::models::{Agent, Chunk, ConversationTurn, KnowledgeSpace, Namespace, ScoredChunk};

/// Failure from a [`VectorIndex`] delete.
///
/// A missing collection is reported separately so the lifecycle can treat
/// it as already deleted.
#[derive(Debug, Error)]
pub enum VectorIndexError {
    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Namespace-scoped vector storage.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace chunks under `namespace` in a single batch,
    /// creating the collection on first use.
    async fn upsert_chunks(&self, namespace: &Namespace, chunks: &[Chunk]) -> Result<()>;

    /// Return up to `top_k` chunks ordered by cosine similarity, highest
    /// first. A namespace with no collection yields an empty result.
    async fn query(
        &self,
        namespace: &Namespace,
        vector: &Embedding,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Drop the whole collection backing `namespace`.
    async fn delete_collection(&self, namespace: &Namespace) -> Result<(), VectorIndexError>;
}

#[async_trait]
pub trait KnowledgeSpaceStore: Send + Sync {
    async fn save(&self, knowledge_space: &KnowledgeSpace) -> Result<()>;

    async fn find(&self, tenant_id: &str, knowledge_space_id: &str)
        -> Result<Option<KnowledgeSpace>>;

    /// All knowledge spaces of a tenant, newest first.
    async fn list(&self, tenant_id: &str) -> Result<Vec<KnowledgeSpace>>;

    /// Returns `false` when nothing matched.
    async fn delete(&self, tenant_id: &str, knowledge_space_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn save_agent(&self, agent: &Agent) -> Result<()>;

    async fn find_agent(&self, tenant_id: &str, agent_id: &str) -> Result<Option<Agent>>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append_turn(&self, turn: &ConversationTurn) -> Result<()>;

    /// Turns of one conversation in the order they were appended.
    async fn turns(&self, tenant_id: &str, conversation_id: &str) -> Result<Vec<ConversationTurn>>;
}
