//! SQLite-backed metadata stores.
//!
//! [`SqliteStore`] implements [`KnowledgeSpaceStore`], [`AgentStore`] and
//! [`ConversationStore`] over the schema created by [`crate::migrate`].
//! List-valued fields are stored as JSON text columns and timestamps as
//! RFC 3339 text with a fixed precision, so ordering by the text column is
//! chronological.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use ragchat_core::models::{Agent, ConversationTurn, KnowledgeSpace};
use ragchat_core::store::{AgentStore, ConversationStore, KnowledgeSpaceStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(text: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)
        .with_context(|| format!("invalid timestamp in database: {}", text))?
        .with_timezone(&Utc))
}

fn knowledge_space_from_row(row: &SqliteRow) -> Result<KnowledgeSpace> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let source_urls: String = row.try_get("source_urls_json")?;
    let metadata: String = row.try_get("metadata_json")?;
    let created_at: String = row.try_get("created_at")?;
    let document_count: i64 = row.try_get("document_count")?;

    Ok(KnowledgeSpace {
        tenant_id: row.try_get("tenant_id")?,
        knowledge_space_id: row.try_get("knowledge_space_id")?,
        name: row.try_get("name")?,
        kind: kind.parse().map_err(anyhow::Error::msg)?,
        source_urls: serde_json::from_str(&source_urls)?,
        version: row.try_get("version")?,
        created_at: parse_ts(&created_at)?,
        status: status.parse().map_err(anyhow::Error::msg)?,
        document_count: usize::try_from(document_count).unwrap_or(0),
        metadata: serde_json::from_str(&metadata)?,
    })
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent> {
    let knowledge_space_ids: String = row.try_get("knowledge_space_ids_json")?;
    let strict_rag: i64 = row.try_get("strict_rag")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Agent {
        id: row.try_get("agent_id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        knowledge_space_ids: serde_json::from_str(&knowledge_space_ids)?,
        strict_rag: strict_rag != 0,
        created_at: parse_ts(&created_at)?,
    })
}

fn turn_from_row(row: &SqliteRow) -> Result<ConversationTurn> {
    let cited_urls: String = row.try_get("cited_urls_json")?;
    let is_rag: i64 = row.try_get("is_rag")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(ConversationTurn {
        conversation_id: row.try_get("conversation_id")?,
        tenant_id: row.try_get("tenant_id")?,
        agent_id: row.try_get("agent_id")?,
        user_id: row.try_get("user_id")?,
        user_message: row.try_get("user_message")?,
        assistant_message: row.try_get("assistant_message")?,
        cited_urls: serde_json::from_str(&cited_urls)?,
        is_rag: is_rag != 0,
        created_at: parse_ts(&created_at)?,
    })
}

#[async_trait]
impl KnowledgeSpaceStore for SqliteStore {
    async fn save(&self, ks: &KnowledgeSpace) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_spaces (tenant_id, knowledge_space_id, name, kind,
                                          source_urls_json, version, created_at, status,
                                          document_count, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, knowledge_space_id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                source_urls_json = excluded.source_urls_json,
                version = excluded.version,
                created_at = excluded.created_at,
                status = excluded.status,
                document_count = excluded.document_count,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(&ks.tenant_id)
        .bind(&ks.knowledge_space_id)
        .bind(&ks.name)
        .bind(ks.kind.as_str())
        .bind(serde_json::to_string(&ks.source_urls)?)
        .bind(&ks.version)
        .bind(format_ts(&ks.created_at))
        .bind(ks.status.as_str())
        .bind(ks.document_count as i64)
        .bind(serde_json::to_string(&ks.metadata)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(
        &self,
        tenant_id: &str,
        knowledge_space_id: &str,
    ) -> Result<Option<KnowledgeSpace>> {
        let row = sqlx::query(
            "SELECT * FROM knowledge_spaces WHERE tenant_id = ? AND knowledge_space_id = ?",
        )
        .bind(tenant_id)
        .bind(knowledge_space_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(knowledge_space_from_row).transpose()
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<KnowledgeSpace>> {
        let rows = sqlx::query(
            "SELECT * FROM knowledge_spaces WHERE tenant_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(knowledge_space_from_row).collect()
    }

    async fn delete(&self, tenant_id: &str, knowledge_space_id: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM knowledge_spaces WHERE tenant_id = ? AND knowledge_space_id = ?")
                .bind(tenant_id)
                .bind(knowledge_space_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn save_agent(&self, agent: &Agent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agents (tenant_id, agent_id, name, knowledge_space_ids_json,
                                strict_rag, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, agent_id) DO UPDATE SET
                name = excluded.name,
                knowledge_space_ids_json = excluded.knowledge_space_ids_json,
                strict_rag = excluded.strict_rag
            "#,
        )
        .bind(&agent.tenant_id)
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(serde_json::to_string(&agent.knowledge_space_ids)?)
        .bind(agent.strict_rag as i64)
        .bind(format_ts(&agent.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_agent(&self, tenant_id: &str, agent_id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE tenant_id = ? AND agent_id = ?")
            .bind(tenant_id)
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(agent_from_row).transpose()
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn append_turn(&self, turn: &ConversationTurn) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversation_turns (conversation_id, tenant_id, agent_id, user_id,
                                            user_message, assistant_message, cited_urls_json,
                                            is_rag, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&turn.conversation_id)
        .bind(&turn.tenant_id)
        .bind(&turn.agent_id)
        .bind(&turn.user_id)
        .bind(&turn.user_message)
        .bind(&turn.assistant_message)
        .bind(serde_json::to_string(&turn.cited_urls)?)
        .bind(turn.is_rag as i64)
        .bind(format_ts(&turn.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn turns(&self, tenant_id: &str, conversation_id: &str) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            "SELECT * FROM conversation_turns WHERE tenant_id = ? AND conversation_id = ? ORDER BY seq",
        )
        .bind(tenant_id)
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(turn_from_row).collect()
    }
}
