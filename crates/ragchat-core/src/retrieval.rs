//! Retrieval-augmented chat.
//!
//! One chat turn runs strictly in sequence, each step feeding the next:
//!
//! 1. Load the agent (unknown agent is [`RagError::NotFound`]).
//! 2. Take the last `user` message from the supplied history.
//! 3. Embed it.
//! 4. Query the top-K chunks of every knowledge space linked to the agent.
//! 5. Keep hits with `score >= similarity_threshold`, highest first, at
//!    most `max_context_chunks` of them.
//! 6. Render the survivors into a markdown context block, or the
//!    no-information sentinel when nothing survived.
//! 7. Compose the prompt and call the language model. A strict-RAG agent
//!    with no surviving hits answers with the sentinel and skips the model.
//! 8. Cite the de-duplicated URLs of the included chunks, capped at
//!    `max_cited_urls`.
//! 9. Append the turn to the conversation log.
//!
//! The conversation id is an explicit input/output pair: callers pass
//! `None` on the first turn and resupply the returned id afterwards.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::RagError;
use crate::llm::LanguageModel;
use crate::models::{ChatMessage, ConversationTurn, Role, ScoredChunk};
use crate::store::{AgentStore, ConversationStore, KnowledgeSpaceStore, VectorIndex};

/// Answer used when the knowledge base has nothing relevant.
pub const NO_INFORMATION: &str = "No relevant information was found in the knowledge base.";

const CONTEXT_HEADER: &str = "# Context Documents";

const SYSTEM_INSTRUCTION: &str = "You are the official support assistant.
Answer only from the information in the CONTEXT section.
If the context does not contain the answer, reply exactly:
\"No relevant information was found in the knowledge base.\"
Never guess or fabricate facts, prices, or links.";

const TASK_INSTRUCTION: &str =
    "Answer the user's latest question using only the information in CONTEXT.";

/// Retrieval knobs. Defaults are the reference values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub top_k: usize,
    /// Inclusive lower bound on cosine similarity.
    pub similarity_threshold: f32,
    pub max_context_chunks: usize,
    pub max_cited_urls: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.75,
            max_context_chunks: 5,
            max_cited_urls: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub tenant_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub messages: Vec<ChatMessage>,
    pub conversation_id: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantMessage {
    pub role: Role,
    pub content: String,
    pub cited_urls: Vec<String>,
    #[serde(rename = "isRag")]
    pub is_rag: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: &'static str,
}

/// A `chat.completion` response. `id` equals `conversation_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub conversation_id: String,
    pub choices: Vec<ChatChoice>,
}

impl ChatCompletion {
    fn new(conversation_id: String, model: String, message: AssistantMessage) -> Self {
        Self {
            id: conversation_id.clone(),
            object: "chat.completion",
            created: Utc::now().timestamp(),
            model,
            conversation_id,
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason: "stop",
            }],
        }
    }

    /// The single assistant message.
    pub fn message(&self) -> Option<&AssistantMessage> {
        self.choices.first().map(|c| &c.message)
    }
}

pub struct ChatPipeline {
    agents: Arc<dyn AgentStore>,
    knowledge_spaces: Arc<dyn KnowledgeSpaceStore>,
    conversations: Arc<dyn ConversationStore>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    params: RetrievalParams,
}

impl ChatPipeline {
    pub fn new(
        agents: Arc<dyn AgentStore>,
        knowledge_spaces: Arc<dyn KnowledgeSpaceStore>,
        conversations: Arc<dyn ConversationStore>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            agents,
            knowledge_spaces,
            conversations,
            vectors,
            embedder,
            llm,
            params,
        }
    }

    pub fn params(&self) -> RetrievalParams {
        self.params
    }

    pub async fn execute(&self, request: ChatRequest) -> Result<ChatCompletion, RagError> {
        if request.agent_id.trim().is_empty() {
            return Err(RagError::validation("model (agent id) is required"));
        }

        let agent = self
            .agents
            .find_agent(&request.tenant_id, &request.agent_id)
            .await
            .map_err(|e| RagError::dependency("loading agent failed", e))?
            .ok_or_else(|| RagError::not_found(format!("agent '{}' not found", request.agent_id)))?;

        if request.messages.is_empty() {
            return Err(RagError::validation("messages must not be empty"));
        }

        let question = last_user_message(&request.messages)?;
        let request_id = request.request_id.as_deref().unwrap_or("");

        tracing::info!(
            tenant_id = %request.tenant_id,
            agent_id = %agent.id,
            request_id,
            linked_knowledge_spaces = agent.knowledge_space_ids.len(),
            "processing chat request"
        );

        let query = embed_query(self.embedder.as_ref(), question)
            .await
            .map_err(|e| RagError::dependency("embedding request failed", e))?;

        let mut hits = Vec::new();
        for ks_id in &agent.knowledge_space_ids {
            let knowledge_space = self
                .knowledge_spaces
                .find(&request.tenant_id, ks_id)
                .await
                .map_err(|e| RagError::dependency("loading knowledge space failed", e))?;
            let Some(knowledge_space) = knowledge_space else {
                tracing::warn!(
                    tenant_id = %request.tenant_id,
                    agent_id = %agent.id,
                    knowledge_space_id = %ks_id,
                    request_id,
                    "linked knowledge space not found, skipping"
                );
                continue;
            };

            let results = self
                .vectors
                .query(&knowledge_space.namespace(), &query, self.params.top_k)
                .await
                .map_err(|e| RagError::dependency("vector query failed", e))?;
            hits.extend(results);
        }

        let included = select_context(hits, &self.params);
        let is_rag = !included.is_empty();

        tracing::debug!(
            agent_id = %agent.id,
            request_id,
            hit_count = included.len(),
            top_score = included.first().map(|h| h.score).unwrap_or(0.0),
            threshold = self.params.similarity_threshold,
            "retrieval completed"
        );

        let (content, cited) = if agent.strict_rag && !is_rag {
            (NO_INFORMATION.to_string(), Vec::new())
        } else {
            let context = render_context(&included);
            let prompt = build_prompt(&context, &request.messages, question);
            let answer = self
                .llm
                .complete(&prompt)
                .await
                .map_err(|e| RagError::dependency("language model request failed", e))?;
            (answer, cited_urls(&included, self.params.max_cited_urls))
        };

        let conversation_id = request
            .conversation_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_conversation_id);

        let turn = ConversationTurn {
            conversation_id: conversation_id.clone(),
            tenant_id: request.tenant_id.clone(),
            agent_id: agent.id.clone(),
            user_id: request.user_id.clone(),
            user_message: question.to_string(),
            assistant_message: content.clone(),
            cited_urls: cited.clone(),
            is_rag,
            created_at: Utc::now(),
        };
        self.conversations
            .append_turn(&turn)
            .await
            .map_err(|e| RagError::dependency("saving conversation failed", e))?;

        Ok(ChatCompletion::new(
            conversation_id,
            agent.id,
            AssistantMessage {
                role: Role::Assistant,
                content,
                cited_urls: cited,
                is_rag,
            },
        ))
    }
}

/// Content of the last message with role `user`.
pub fn last_user_message(messages: &[ChatMessage]) -> Result<&str, RagError> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .ok_or_else(|| RagError::validation("No user message found"))
}

/// Threshold, sort descending, truncate.
pub fn select_context(mut hits: Vec<ScoredChunk>, params: &RetrievalParams) -> Vec<ScoredChunk> {
    hits.retain(|h| h.score >= params.similarity_threshold);
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(params.max_context_chunks);
    hits
}

/// Markdown context block; the sentinel when `included` is empty.
pub fn render_context(included: &[ScoredChunk]) -> String {
    let mut markdown = format!("{}\n\n", CONTEXT_HEADER);
    if included.is_empty() {
        markdown.push_str(NO_INFORMATION);
        markdown.push('\n');
        return markdown;
    }
    for (i, hit) in included.iter().enumerate() {
        markdown.push_str(&format!(
            "{}. [{}]({})\n{}\n\n",
            i + 1,
            hit.chunk.metadata.title,
            hit.chunk.url,
            hit.chunk.text
        ));
    }
    markdown
}

/// Non-empty URLs of the included chunks, de-duplicated, in context order.
pub fn cited_urls(included: &[ScoredChunk], max: usize) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for hit in included {
        if urls.len() >= max {
            break;
        }
        let url = &hit.chunk.url;
        if !url.is_empty() && !urls.contains(url) {
            urls.push(url.clone());
        }
    }
    urls
}

pub fn build_prompt(context: &str, history: &[ChatMessage], question: &str) -> String {
    let history: Vec<String> = history
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
        .collect();

    format!(
        "SYSTEM: {}\n\nCONTEXT:\n{}\n\nCONVERSATION HISTORY:\n{}\n\nUSER: {}\n\nTASK: {}",
        SYSTEM_INSTRUCTION,
        context,
        history.join("\n"),
        question,
        TASK_INSTRUCTION
    )
}

/// `conv_` followed by 32 hex digits.
pub fn new_conversation_id() -> String {
    format!("conv_{}", Uuid::new_v4().simple())
}
