//! Listing and deleting knowledge spaces.
//!
//! Deletion removes the vector collection first and the metadata row
//! second. Vector cleanup is best-effort: a missing collection is logged
//! and ignored, and when no vector index is configured at all the
//! metadata row is still deleted. Metadata deletion is authoritative.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::RagError;
use crate::models::{KnowledgeSpaceStatus, KnowledgeSpaceType};
use crate::store::{KnowledgeSpaceStore, VectorIndex, VectorIndexError};

/// Tenant-facing view of a knowledge space.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSpaceSummary {
    pub knowledge_space_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: KnowledgeSpaceType,
    pub status: KnowledgeSpaceStatus,
    pub document_count: usize,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub source_urls: Vec<String>,
}

pub struct KnowledgeSpaceLifecycle {
    knowledge_spaces: Arc<dyn KnowledgeSpaceStore>,
    vectors: Option<Arc<dyn VectorIndex>>,
}

impl KnowledgeSpaceLifecycle {
    pub fn new(
        knowledge_spaces: Arc<dyn KnowledgeSpaceStore>,
        vectors: Option<Arc<dyn VectorIndex>>,
    ) -> Self {
        Self {
            knowledge_spaces,
            vectors,
        }
    }

    /// Knowledge spaces of `tenant_id`, newest first.
    pub async fn list(&self, tenant_id: &str) -> Result<Vec<KnowledgeSpaceSummary>, RagError> {
        let spaces = self
            .knowledge_spaces
            .list(tenant_id)
            .await
            .map_err(|e| RagError::dependency("listing knowledge spaces failed", e))?;

        Ok(spaces
            .into_iter()
            .map(|ks| KnowledgeSpaceSummary {
                knowledge_space_id: ks.knowledge_space_id,
                name: ks.name,
                kind: ks.kind,
                status: ks.status,
                document_count: ks.document_count,
                version: ks.version,
                created_at: ks.created_at,
                source_urls: ks.source_urls,
            })
            .collect())
    }

    pub async fn delete(&self, tenant_id: &str, knowledge_space_id: &str) -> Result<(), RagError> {
        let knowledge_space = self
            .knowledge_spaces
            .find(tenant_id, knowledge_space_id)
            .await
            .map_err(|e| RagError::dependency("loading knowledge space failed", e))?
            .ok_or_else(|| {
                RagError::not_found(format!("knowledge space '{}' not found", knowledge_space_id))
            })?;

        match &self.vectors {
            Some(vectors) => match vectors.delete_collection(&knowledge_space.namespace()).await {
                Ok(()) => {
                    tracing::info!(tenant_id, knowledge_space_id, "vector collection deleted");
                }
                Err(VectorIndexError::CollectionNotFound(collection)) => {
                    tracing::warn!(
                        tenant_id,
                        knowledge_space_id,
                        collection = %collection,
                        "vector collection not found, continuing with metadata delete"
                    );
                }
                Err(VectorIndexError::Other(e)) => {
                    return Err(RagError::dependency("deleting vector collection failed", e));
                }
            },
            None => {
                tracing::warn!(
                    tenant_id,
                    knowledge_space_id,
                    "no vector index configured, skipping vector cleanup"
                );
            }
        }

        let deleted = self
            .knowledge_spaces
            .delete(tenant_id, knowledge_space_id)
            .await
            .map_err(|e| RagError::dependency("deleting knowledge space failed", e))?;
        if !deleted {
            return Err(RagError::not_found(format!(
                "knowledge space '{}' not found",
                knowledge_space_id
            )));
        }

        tracing::info!(tenant_id, knowledge_space_id, "knowledge space deleted");
        Ok(())
    }
}
