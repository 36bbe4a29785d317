//! Agent creation.
//!
//! An agent must name at least one knowledge space of its own tenant.
//! API callers get [`LinkCheck::Strict`], so a typo in a knowledge-space id
//! is a validation error. Operators may pre-link spaces that do not exist
//! yet with [`LinkCheck::WarnOnly`].

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::RagError;
use crate::models::Agent;
use crate::store::{AgentStore, KnowledgeSpaceStore};

const MAX_AGENT_NAME_CHARS: usize = 200;

/// How [`AgentRegistry::create`] treats knowledge-space ids it cannot find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCheck {
    Strict,
    WarnOnly,
}

#[derive(Debug, Clone)]
pub struct CreateAgentInput {
    pub tenant_id: String,
    /// Generated as `agent_<uuid>` when absent.
    pub agent_id: Option<String>,
    pub name: String,
    pub knowledge_space_ids: Vec<String>,
    pub strict_rag: bool,
}

pub struct AgentRegistry {
    agents: Arc<dyn AgentStore>,
    knowledge_spaces: Arc<dyn KnowledgeSpaceStore>,
}

impl AgentRegistry {
    pub fn new(agents: Arc<dyn AgentStore>, knowledge_spaces: Arc<dyn KnowledgeSpaceStore>) -> Self {
        Self {
            agents,
            knowledge_spaces,
        }
    }

    /// Validate and save a new agent. Saving over an existing id replaces it.
    pub async fn create(&self, input: CreateAgentInput, check: LinkCheck) -> Result<Agent, RagError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(RagError::validation("name must not be empty"));
        }
        if name.chars().count() > MAX_AGENT_NAME_CHARS {
            return Err(RagError::validation(format!(
                "name must be at most {} characters",
                MAX_AGENT_NAME_CHARS
            )));
        }
        if let Some(id) = &input.agent_id {
            if id.trim().is_empty() {
                return Err(RagError::validation("agentId must not be blank"));
            }
        }

        let mut knowledge_space_ids: Vec<String> = Vec::new();
        for id in input.knowledge_space_ids {
            let id = id.trim().to_string();
            if !id.is_empty() && !knowledge_space_ids.contains(&id) {
                knowledge_space_ids.push(id);
            }
        }
        if knowledge_space_ids.is_empty() {
            return Err(RagError::validation("knowledgeSpaceIds must not be empty"));
        }

        let unknown = self
            .unknown_knowledge_spaces(&input.tenant_id, &knowledge_space_ids)
            .await?;
        if !unknown.is_empty() {
            match check {
                LinkCheck::Strict => {
                    return Err(RagError::validation(format!(
                        "unknown knowledge space ids: {}",
                        unknown.join(", ")
                    )));
                }
                LinkCheck::WarnOnly => {
                    for id in &unknown {
                        tracing::warn!(
                            tenant_id = %input.tenant_id,
                            knowledge_space_id = %id,
                            "linking unknown knowledge space"
                        );
                    }
                }
            }
        }

        let agent = Agent {
            id: input
                .agent_id
                .map(|id| id.trim().to_string())
                .unwrap_or_else(|| format!("agent_{}", Uuid::new_v4().simple())),
            tenant_id: input.tenant_id,
            name: name.to_string(),
            knowledge_space_ids,
            strict_rag: input.strict_rag,
            created_at: Utc::now(),
        };
        self.agents
            .save_agent(&agent)
            .await
            .map_err(|e| RagError::dependency("saving agent failed", e))?;

        tracing::info!(
            tenant_id = %agent.tenant_id,
            agent_id = %agent.id,
            linked_knowledge_spaces = agent.knowledge_space_ids.len(),
            "agent saved"
        );
        Ok(agent)
    }

    /// The ids in `ids` with no knowledge space under `tenant_id`.
    pub async fn unknown_knowledge_spaces(
        &self,
        tenant_id: &str,
        ids: &[String],
    ) -> Result<Vec<String>, RagError> {
        let mut unknown = Vec::new();
        for id in ids {
            let found = self
                .knowledge_spaces
                .find(tenant_id, id)
                .await
                .map_err(|e| RagError::dependency("loading knowledge space failed", e))?;
            if found.is_none() {
                unknown.push(id.clone());
            }
        }
        Ok(unknown)
    }
}
