//! Vector index selection.
//!
//! | `vector.provider` | Index |
//! |-------------------|-------|
//! | `qdrant` | [`QdrantIndex`] |
//! | `memory` | [`InMemoryVectorIndex`] (process-local) |
//! | `disabled` | none; ingestion and chat fail, deletes skip vector cleanup |

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use ragchat_core::embedding::Embedding;
use ragchat_core::models::{Chunk, Namespace, ScoredChunk};
use ragchat_core::store::memory::InMemoryVectorIndex;
use ragchat_core::store::{VectorIndex, VectorIndexError};

use crate::config::VectorConfig;
use crate::qdrant::QdrantIndex;

/// Stand-in used by the pipelines when no vector index is configured.
pub struct DisabledIndex;

#[async_trait]
impl VectorIndex for DisabledIndex {
    async fn upsert_chunks(&self, _namespace: &Namespace, _chunks: &[Chunk]) -> Result<()> {
        bail!("Vector index is disabled")
    }

    async fn query(
        &self,
        _namespace: &Namespace,
        _vector: &Embedding,
        _top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        bail!("Vector index is disabled")
    }

    async fn delete_collection(&self, _namespace: &Namespace) -> Result<(), VectorIndexError> {
        Err(VectorIndexError::Other(anyhow::anyhow!(
            "Vector index is disabled"
        )))
    }
}

/// The configured index, or `None` when `vector.provider = "disabled"`.
pub fn create_index(config: &VectorConfig) -> Result<Option<Arc<dyn VectorIndex>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "memory" => Ok(Some(Arc::new(InMemoryVectorIndex::new()))),
        "qdrant" => Ok(Some(Arc::new(QdrantIndex::new(config)?))),
        other => bail!("Unknown vector provider: {}", other),
    }
}
