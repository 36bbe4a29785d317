//! In-memory store implementations for tests and single-process setups.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Each collection maps chunk id to chunk, so upserts are constant time per
//! chunk. Vector search is brute-force cosine similarity over all chunks in
//! the namespace's collection; equal scores are ordered by chunk id.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::Embedding;
use crate::models::{Agent, Chunk, ConversationTurn, KnowledgeSpace, Namespace, ScoredChunk};

use super::{AgentStore, ConversationStore, KnowledgeSpaceStore, VectorIndex, VectorIndexError};

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

/// Collections keyed by [`Namespace::collection_name`].
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, HashMap<String, Chunk>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of chunks stored under `namespace`, `None` if no collection exists.
    pub fn collection_len(&self, namespace: &Namespace) -> Option<usize> {
        self.collections
            .read()
            .ok()?
            .get(&namespace.collection_name())
            .map(HashMap::len)
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert_chunks(&self, namespace: &Namespace, chunks: &[Chunk]) -> Result<()> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let collection = collections.entry(namespace.collection_name()).or_default();
        collection.extend(chunks.iter().map(|chunk| (chunk.id.clone(), chunk.clone())));
        Ok(())
    }

    async fn query(
        &self,
        namespace: &Namespace,
        vector: &Embedding,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let collections = self.collections.read().map_err(poisoned)?;
        let Some(collection) = collections.get(&namespace.collection_name()) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredChunk> = collection
            .values()
            .map(|chunk| ScoredChunk {
                score: vector.cosine_similarity(&chunk.embedding),
                chunk: chunk.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_collection(&self, namespace: &Namespace) -> Result<(), VectorIndexError> {
        let name = namespace.collection_name();
        let mut collections = self.collections.write().map_err(poisoned)?;
        match collections.remove(&name) {
            Some(_) => Ok(()),
            None => Err(VectorIndexError::CollectionNotFound(name)),
        }
    }
}

/// Metadata store holding knowledge spaces, agents, and the conversation log.
pub struct InMemoryStore {
    knowledge_spaces: RwLock<HashMap<(String, String), KnowledgeSpace>>,
    agents: RwLock<HashMap<(String, String), Agent>>,
    turns: RwLock<Vec<ConversationTurn>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            knowledge_spaces: RwLock::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
            turns: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeSpaceStore for InMemoryStore {
    async fn save(&self, knowledge_space: &KnowledgeSpace) -> Result<()> {
        let key = (
            knowledge_space.tenant_id.clone(),
            knowledge_space.knowledge_space_id.clone(),
        );
        self.knowledge_spaces
            .write()
            .map_err(poisoned)?
            .insert(key, knowledge_space.clone());
        Ok(())
    }

    async fn find(
        &self,
        tenant_id: &str,
        knowledge_space_id: &str,
    ) -> Result<Option<KnowledgeSpace>> {
        let key = (tenant_id.to_string(), knowledge_space_id.to_string());
        Ok(self
            .knowledge_spaces
            .read()
            .map_err(poisoned)?
            .get(&key)
            .cloned())
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<KnowledgeSpace>> {
        let mut spaces: Vec<KnowledgeSpace> = self
            .knowledge_spaces
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|ks| ks.tenant_id == tenant_id)
            .cloned()
            .collect();
        spaces.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(spaces)
    }

    async fn delete(&self, tenant_id: &str, knowledge_space_id: &str) -> Result<bool> {
        let key = (tenant_id.to_string(), knowledge_space_id.to_string());
        Ok(self
            .knowledge_spaces
            .write()
            .map_err(poisoned)?
            .remove(&key)
            .is_some())
    }
}

#[async_trait]
impl AgentStore for InMemoryStore {
    async fn save_agent(&self, agent: &Agent) -> Result<()> {
        let key = (agent.tenant_id.clone(), agent.id.clone());
        self.agents
            .write()
            .map_err(poisoned)?
            .insert(key, agent.clone());
        Ok(())
    }

    async fn find_agent(&self, tenant_id: &str, agent_id: &str) -> Result<Option<Agent>> {
        let key = (tenant_id.to_string(), agent_id.to_string());
        Ok(self.agents.read().map_err(poisoned)?.get(&key).cloned())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn append_turn(&self, turn: &ConversationTurn) -> Result<()> {
        self.turns.write().map_err(poisoned)?.push(turn.clone());
        Ok(())
    }

    async fn turns(&self, tenant_id: &str, conversation_id: &str) -> Result<Vec<ConversationTurn>> {
        Ok(self
            .turns
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}
