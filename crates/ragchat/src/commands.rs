//! CLI command implementations.
//!
//! Each command builds an [`AppContext`] from the loaded configuration and
//! calls the same pipeline the HTTP API uses. Results go to stdout as
//! pretty-printed JSON (or SSE frames for `chat --stream`); logs go to
//! stderr.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use ragchat_core::agents::{CreateAgentInput, LinkCheck};
use ragchat_core::ingest::{CreateKnowledgeSpaceInput, CreateWebKnowledgeSpaceInput};
use ragchat_core::models::ChatMessage;
use ragchat_core::retrieval::ChatRequest;
use ragchat_core::sse::{StreamEncoder, StreamMeta, StreamOptions};

use crate::context::AppContext;

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn ingest_products(ctx: &AppContext, tenant: &str, name: &str, file: &Path) -> Result<()> {
    let file_content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read product file: {}", file.display()))?;

    let output = ctx
        .ingestion
        .create_product_knowledge_space(CreateKnowledgeSpaceInput {
            tenant_id: tenant.to_string(),
            name: name.to_string(),
            file_content,
            request_id: None,
        })
        .await?;
    print_json(&output)
}

pub async fn ingest_web(ctx: &AppContext, tenant: &str, name: &str, urls: Vec<String>) -> Result<()> {
    let output = ctx
        .ingestion
        .create_web_knowledge_space(CreateWebKnowledgeSpaceInput {
            tenant_id: tenant.to_string(),
            name: name.to_string(),
            source_urls: urls,
            request_id: None,
        })
        .await?;
    print_json(&output)
}

pub async fn create_agent(
    ctx: &AppContext,
    tenant: &str,
    name: &str,
    id: Option<String>,
    knowledge_space_ids: Vec<String>,
    strict_rag: bool,
) -> Result<()> {
    let agent = ctx
        .agents
        .create(
            CreateAgentInput {
                tenant_id: tenant.to_string(),
                agent_id: id,
                name: name.to_string(),
                knowledge_space_ids,
                strict_rag,
            },
            LinkCheck::WarnOnly,
        )
        .await?;
    print_json(&agent)
}

pub async fn list_knowledge(ctx: &AppContext, tenant: &str) -> Result<()> {
    let spaces = ctx.lifecycle.list(tenant).await?;
    if spaces.is_empty() {
        eprintln!("No knowledge spaces for tenant '{}'.", tenant);
    }
    print_json(&spaces)
}

pub async fn delete_knowledge(ctx: &AppContext, tenant: &str, knowledge_space_id: &str) -> Result<()> {
    ctx.lifecycle.delete(tenant, knowledge_space_id).await?;
    println!("Deleted knowledge space {}.", knowledge_space_id);
    Ok(())
}

pub struct ChatArgs {
    pub tenant: String,
    pub user: String,
    pub agent: String,
    pub conversation: Option<String>,
    pub message: String,
    pub stream: bool,
}

pub async fn chat(ctx: &AppContext, args: ChatArgs) -> Result<()> {
    let completion = ctx
        .chat
        .execute(ChatRequest {
            tenant_id: args.tenant,
            user_id: args.user,
            agent_id: args.agent,
            messages: vec![ChatMessage::user(args.message)],
            conversation_id: args.conversation,
            request_id: None,
        })
        .await?;

    if !args.stream {
        return print_json(&completion);
    }

    let message = completion
        .message()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("completion had no message"))?;
    let encoder = StreamEncoder::new(StreamMeta {
        id: completion.id,
        model: completion.model,
        created: Some(completion.created),
    });
    let frames = encoder.frames(
        message.content,
        StreamOptions {
            include_done_message: true,
            cited_urls: message.cited_urls,
            is_rag: Some(message.is_rag),
            chunk_bytes: ctx.config.streaming.chunk_bytes,
        },
    )?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for frame in frames {
        out.write_all(frame?.as_bytes())?;
    }
    out.flush()?;
    Ok(())
}
