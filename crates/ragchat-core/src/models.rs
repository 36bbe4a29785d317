//! Core data models shared across the ingestion and chat pipelines.
//!
//! These types are storage-agnostic. The SQLite stores in the application
//! crate and the in-memory stores in [`crate::store::memory`] both persist
//! them as-is.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embedding::Embedding;

/// Scoping key for every vector-index operation and metadata row.
///
/// The version is a date stamp assigned when the knowledge space is
/// created and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub tenant_id: String,
    pub knowledge_space_id: String,
    pub version: String,
}

impl Namespace {
    pub fn new(
        tenant_id: impl Into<String>,
        knowledge_space_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            knowledge_space_id: knowledge_space_id.into(),
            version: version.into(),
        }
    }

    /// Physical collection name for this namespace.
    ///
    /// `ns_<tenant>_<ks>_<version>_<hash>` where each part keeps only
    /// `[A-Za-z0-9-]` and the hash suffix is the first 8 hex digits of the
    /// SHA-256 of the raw triple, so two namespaces that sanitize to the
    /// same text still map to different collections.
    pub fn collection_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.tenant_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.knowledge_space_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.version.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        format!(
            "ns_{}_{}_{}_{}",
            sanitize(&self.tenant_id),
            sanitize(&self.knowledge_space_id),
            sanitize(&self.version),
            &digest[..8]
        )
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeSpaceType {
    Web,
    Product,
}

impl KnowledgeSpaceType {
    pub fn as_str(self) -> &'static str {
        match self {
            KnowledgeSpaceType::Web => "web",
            KnowledgeSpaceType::Product => "product",
        }
    }
}

impl FromStr for KnowledgeSpaceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(KnowledgeSpaceType::Web),
            "product" => Ok(KnowledgeSpaceType::Product),
            other => Err(format!("unknown knowledge space type '{}'", other)),
        }
    }
}

impl fmt::Display for KnowledgeSpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeSpaceStatus {
    Completed,
    Partial,
    Error,
}

impl KnowledgeSpaceStatus {
    /// `completed` with no failures, `partial` when something still
    /// succeeded, `error` otherwise.
    pub fn from_counts(success_count: usize, failure_count: usize) -> Self {
        if failure_count == 0 {
            KnowledgeSpaceStatus::Completed
        } else if success_count > 0 {
            KnowledgeSpaceStatus::Partial
        } else {
            KnowledgeSpaceStatus::Error
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KnowledgeSpaceStatus::Completed => "completed",
            KnowledgeSpaceStatus::Partial => "partial",
            KnowledgeSpaceStatus::Error => "error",
        }
    }
}

impl FromStr for KnowledgeSpaceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(KnowledgeSpaceStatus::Completed),
            "partial" => Ok(KnowledgeSpaceStatus::Partial),
            "error" => Ok(KnowledgeSpaceStatus::Error),
            other => Err(format!("unknown knowledge space status '{}'", other)),
        }
    }
}

impl fmt::Display for KnowledgeSpaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root for one ingested, versioned collection of source material.
///
/// Created once by the ingestion pipeline and never mutated afterwards
/// except for deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSpace {
    pub tenant_id: String,
    pub knowledge_space_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: KnowledgeSpaceType,
    pub source_urls: Vec<String>,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub status: KnowledgeSpaceStatus,
    pub document_count: usize,
    /// Ingestion summary: source type, schema version, counts, per-item errors.
    pub metadata: serde_json::Value,
}

impl KnowledgeSpace {
    pub fn namespace(&self) -> Namespace {
        Namespace::new(
            self.tenant_id.clone(),
            self.knowledge_space_id.clone(),
            self.version.clone(),
        )
    }
}

/// One parsed catalog record. Only its chunk form is ever persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub availability: Option<String>,
    pub tags: Option<Vec<String>>,
    pub image_url: Option<String>,
    pub product_url: Option<String>,
    pub brand: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Per-item parse failure, collected rather than thrown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseItemError {
    /// Zero-based position of the item among the delimited items.
    pub item_index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseSummary {
    pub total_items: usize,
    pub success_count: usize,
    pub failure_count: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    pub products: Vec<Product>,
    pub errors: Vec<ParseItemError>,
    pub summary: ParseSummary,
}

/// Metadata stored alongside every chunk in the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub title: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    /// SHA-256 hex digest of the chunk text.
    pub content_hash: String,
}

/// The unit stored in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub tenant_id: String,
    pub knowledge_space_id: String,
    /// Source URL, or an empty string when the source has none.
    pub url: String,
    /// Domain for crawled pages, brand (or `product`) for catalog records.
    pub source_label: String,
    pub text: String,
    pub embedding: Embedding,
    pub metadata: ChunkMetadata,
    pub created_at: DateTime<Utc>,
}

/// A chunk returned from a vector query with its cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A chat persona bound to one or more knowledge spaces.
///
/// The agent id doubles as the `model` field of chat completion requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub knowledge_space_ids: Vec<String>,
    /// Skip the language model entirely when nothing relevant is retrieved.
    pub strict_rag: bool,
    pub created_at: DateTime<Utc>,
}

/// One completed chat turn, appended to the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub conversation_id: String,
    pub tenant_id: String,
    pub agent_id: String,
    pub user_id: String,
    pub user_message: String,
    pub assistant_message: String,
    pub cited_urls: Vec<String>,
    pub is_rag: bool,
    pub created_at: DateTime<Utc>,
}

/// Text extracted from one fetched web page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawledPage {
    pub url: String,
    pub domain: String,
    pub title: String,
    pub content: String,
}
