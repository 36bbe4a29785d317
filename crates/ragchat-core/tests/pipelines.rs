//! End-to-end pipeline scenarios over in-memory collaborators.

mod common;

use std::sync::Arc;

use common::{
    axis, near, BrokenIndex, Harness, KeywordEmbedder, MapFetcher, ShortEmbedder, CATALOG,
};
use ragchat_core::agents::{AgentRegistry, CreateAgentInput, LinkCheck};
use ragchat_core::ingest::{
    CreateKnowledgeSpaceInput, CreateWebKnowledgeSpaceInput, IngestionPipeline, PageChunking,
};
use ragchat_core::lifecycle::KnowledgeSpaceLifecycle;
use ragchat_core::models::{ChatMessage, KnowledgeSpaceStatus, KnowledgeSpaceType};
use ragchat_core::retrieval::{ChatRequest, NO_INFORMATION};
use ragchat_core::store::memory::{InMemoryStore, InMemoryVectorIndex};
use ragchat_core::store::{AgentStore, ConversationStore, KnowledgeSpaceStore};
use ragchat_core::ErrorKind;

fn embedder() -> Arc<KeywordEmbedder> {
    Arc::new(KeywordEmbedder::new(vec![
        ("price of Trail Runner", near(0, 0.9)),
        ("weather", axis(7)),
        ("Trail Runner", axis(0)),
        ("Coffee Beans", axis(2)),
    ]))
}

fn product_input(content: &str) -> CreateKnowledgeSpaceInput {
    CreateKnowledgeSpaceInput {
        tenant_id: "tenant-1".to_string(),
        name: "Catalog".to_string(),
        file_content: content.to_string(),
        request_id: Some("req-1".to_string()),
    }
}

fn chat_request(agent_id: &str, question: &str) -> ChatRequest {
    ChatRequest {
        tenant_id: "tenant-1".to_string(),
        user_id: "user-1".to_string(),
        agent_id: agent_id.to_string(),
        messages: vec![ChatMessage::user(question)],
        conversation_id: None,
        request_id: None,
    }
}

#[tokio::test]
async fn test_partial_ingestion_persists_successful_products() {
    let embedder = embedder();
    let h = Harness::new(embedder.clone());

    let out = h
        .ingestion
        .create_product_knowledge_space(product_input(CATALOG))
        .await
        .unwrap();

    assert_eq!(out.status, KnowledgeSpaceStatus::Partial);
    assert_eq!(out.kind, KnowledgeSpaceType::Product);
    assert_eq!(out.document_count, 2);
    assert_eq!(out.summary.errors.len(), 1);
    assert_eq!(out.summary.errors[0].item_index, 1);
    assert!(out.summary.errors[0].reason.contains("description"));
    assert_eq!(*embedder.calls.lock().unwrap(), 1);

    let saved = h
        .store
        .find("tenant-1", &out.knowledge_space_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.metadata["sourceType"], "file");
    assert_eq!(saved.metadata["schemaVersion"], "1.0.0");
    assert_eq!(saved.metadata["summary"]["failureCount"], 1);
    assert_eq!(saved.version.len(), "2024-01-01".len());
    assert_eq!(h.index.collection_len(&saved.namespace()), Some(2));
}

#[tokio::test]
async fn test_zero_success_ingestion_is_still_visible() {
    let h = Harness::new(embedder());
    let out = h
        .ingestion
        .create_product_knowledge_space(product_input(
            "--- item start ---\nname: Only Name\n--- item end ---\n",
        ))
        .await
        .unwrap();

    assert_eq!(out.status, KnowledgeSpaceStatus::Error);
    assert_eq!(out.document_count, 0);
    let saved = h.store.list("tenant-1").await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(h.index.collection_len(&saved[0].namespace()), None);
}

#[tokio::test]
async fn test_upsert_failure_leaves_no_knowledge_space() {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = IngestionPipeline::new(store.clone(), Arc::new(BrokenIndex), embedder());

    let err = pipeline
        .create_product_knowledge_space(product_input(CATALOG))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dependency);
    assert!(err.is_retryable());
    assert!(store.list("tenant-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_embedding_dimension_is_fatal() {
    let h = Harness::new(Arc::new(ShortEmbedder));
    let err = h
        .ingestion
        .create_product_knowledge_space(product_input(CATALOG))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dependency);
    assert!(h.store.list("tenant-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_web_ingestion_collects_url_failures() {
    let h = Harness::new(embedder());
    let out = h
        .ingestion
        .create_web_knowledge_space(CreateWebKnowledgeSpaceInput {
            tenant_id: "tenant-1".to_string(),
            name: "Docs".to_string(),
            source_urls: vec![
                "https://docs.example/a".to_string(),
                "https://docs.example/missing".to_string(),
            ],
            request_id: None,
        })
        .await
        .unwrap();

    assert_eq!(out.kind, KnowledgeSpaceType::Web);
    assert_eq!(out.status, KnowledgeSpaceStatus::Partial);
    assert_eq!(out.summary.failed_urls.len(), 1);
    assert_eq!(out.summary.failed_urls[0].url, "https://docs.example/missing");

    let saved = h
        .store
        .find("tenant-1", &out.knowledge_space_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.source_urls.len(), 2);
    assert_eq!(saved.metadata["sourceType"], "web");
    assert_eq!(h.index.collection_len(&saved.namespace()), Some(1));
}

#[tokio::test]
async fn test_web_document_count_is_chunk_count() {
    let store = Arc::new(InMemoryStore::new());
    let index = Arc::new(InMemoryVectorIndex::new());
    let long_page = [
        "Returns are accepted within thirty days of delivery.",
        "Refunds reach the original card within five days.",
        "Exchanges ship free of charge to any address.",
    ]
    .join("\n\n");
    let pipeline = IngestionPipeline::new(store.clone(), index.clone(), embedder())
        .with_page_fetcher(
            Arc::new(MapFetcher::new(vec![("https://docs.example/long", long_page.as_str())])),
            PageChunking {
                max_tokens: 15,
                overlap_tokens: 3,
            },
        );

    let out = pipeline
        .create_web_knowledge_space(CreateWebKnowledgeSpaceInput {
            tenant_id: "tenant-1".to_string(),
            name: "Policies".to_string(),
            source_urls: vec!["https://docs.example/long".to_string()],
            request_id: None,
        })
        .await
        .unwrap();

    assert_eq!(out.summary.success_count, 1);
    assert_eq!(out.document_count, 3);
    let saved = store.find("tenant-1", &out.knowledge_space_id).await.unwrap().unwrap();
    assert_eq!(saved.document_count, 3);
    assert_eq!(index.collection_len(&saved.namespace()), Some(3));
}

#[tokio::test]
async fn test_web_ingestion_fails_when_every_url_fails() {
    let h = Harness::new(embedder());
    let err = h
        .ingestion
        .create_web_knowledge_space(CreateWebKnowledgeSpaceInput {
            tenant_id: "tenant-1".to_string(),
            name: "Docs".to_string(),
            source_urls: vec!["https://docs.example/nope".to_string()],
            request_id: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("All URLs failed"));
    assert!(h.store.list("tenant-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_cites_included_product_url() {
    let h = Harness::new(embedder());
    let out = h
        .ingestion
        .create_product_knowledge_space(product_input(CATALOG))
        .await
        .unwrap();
    h.add_agent("shop-bot", vec![out.knowledge_space_id], false).await;

    let completion = h
        .chat
        .execute(chat_request("shop-bot", "What is the price of Trail Runner?"))
        .await
        .unwrap();

    let message = completion.message().unwrap();
    assert!(message.is_rag);
    assert_eq!(message.cited_urls, vec!["https://shop.example/trail"]);
    assert_eq!(message.content, "It costs 89.90 EUR.");
    assert_eq!(completion.object, "chat.completion");
    assert_eq!(completion.model, "shop-bot");
    assert_eq!(completion.id, completion.conversation_id);
    assert!(completion.id.starts_with("conv_"));

    let prompt = h.model.prompts.lock().unwrap()[0].clone();
    assert!(prompt.contains("1. [Trail Runner](https://shop.example/trail)"));
    assert!(!prompt.contains("Coffee Beans"));

    let turns = h.store.turns("tenant-1", &completion.id).await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].user_message, "What is the price of Trail Runner?");
    assert!(turns[0].is_rag);
}

#[tokio::test]
async fn test_conversation_id_is_reused() {
    let h = Harness::new(embedder());
    h.add_agent("bot", Vec::new(), false).await;

    let mut request = chat_request("bot", "hello");
    request.conversation_id = Some("conv_existing".to_string());
    let first = h.chat.execute(request.clone()).await.unwrap();
    let second = h.chat.execute(request).await.unwrap();

    assert_eq!(first.conversation_id, "conv_existing");
    assert_eq!(second.id, "conv_existing");
    assert_eq!(h.store.turns("tenant-1", "conv_existing").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_below_threshold_is_not_rag() {
    let h = Harness::new(embedder());
    let out = h
        .ingestion
        .create_product_knowledge_space(product_input(CATALOG))
        .await
        .unwrap();
    h.add_agent("lenient", vec![out.knowledge_space_id.clone()], false).await;
    h.add_agent("strict", vec![out.knowledge_space_id], true).await;

    let lenient = h
        .chat
        .execute(chat_request("lenient", "How is the weather?"))
        .await
        .unwrap();
    let message = lenient.message().unwrap();
    assert!(!message.is_rag);
    assert!(message.cited_urls.is_empty());
    assert_eq!(h.model.call_count(), 1);
    assert!(h.model.prompts.lock().unwrap()[0].contains(NO_INFORMATION));

    let strict = h
        .chat
        .execute(chat_request("strict", "How is the weather?"))
        .await
        .unwrap();
    let message = strict.message().unwrap();
    assert_eq!(message.content, NO_INFORMATION);
    assert!(!message.is_rag);
    assert_eq!(h.model.call_count(), 1);
}

#[tokio::test]
async fn test_missing_linked_knowledge_space_is_skipped() {
    let h = Harness::new(embedder());
    let out = h
        .ingestion
        .create_product_knowledge_space(product_input(CATALOG))
        .await
        .unwrap();
    h.add_agent("bot", vec!["deleted-ks".to_string(), out.knowledge_space_id], false)
        .await;

    let completion = h
        .chat
        .execute(chat_request("bot", "What is the price of Trail Runner?"))
        .await
        .unwrap();
    assert!(completion.message().unwrap().is_rag);
}

#[tokio::test]
async fn test_chat_validation_and_not_found() {
    let h = Harness::new(embedder());
    h.add_agent("bot", Vec::new(), false).await;

    let err = h.chat.execute(chat_request("ghost", "hi")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let mut request = chat_request("bot", "hi");
    request.messages = vec![ChatMessage::assistant("no question here")];
    let err = h.chat.execute(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut request = chat_request("bot", "hi");
    request.messages.clear();
    let err = h.chat.execute(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h.chat.execute(chat_request(" ", "hi")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_unknown_agent_wins_over_empty_messages() {
    let h = Harness::new(embedder());
    let mut request = chat_request("ghost", "hi");
    request.messages.clear();
    let err = h.chat.execute(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("ghost"));
}

#[tokio::test]
async fn test_delete_removes_vectors_then_metadata() {
    let h = Harness::new(embedder());
    let out = h
        .ingestion
        .create_product_knowledge_space(product_input(CATALOG))
        .await
        .unwrap();
    let ks = h
        .store
        .find("tenant-1", &out.knowledge_space_id)
        .await
        .unwrap()
        .unwrap();

    h.lifecycle
        .delete("tenant-1", &out.knowledge_space_id)
        .await
        .unwrap();
    assert_eq!(h.index.collection_len(&ks.namespace()), None);
    assert!(h.lifecycle.list("tenant-1").await.unwrap().is_empty());

    let err = h
        .lifecycle
        .delete("tenant-1", &out.knowledge_space_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_delete_tolerates_missing_collection_and_missing_index() {
    let h = Harness::new(embedder());
    let out = h
        .ingestion
        .create_product_knowledge_space(product_input(
            "--- item start ---\nname: Only Name\n--- item end ---\n",
        ))
        .await
        .unwrap();
    // Zero-success ingestion never created a collection.
    h.lifecycle
        .delete("tenant-1", &out.knowledge_space_id)
        .await
        .unwrap();

    let out = h
        .ingestion
        .create_product_knowledge_space(product_input(CATALOG))
        .await
        .unwrap();
    let without_index = KnowledgeSpaceLifecycle::new(h.store.clone(), None);
    without_index
        .delete("tenant-1", &out.knowledge_space_id)
        .await
        .unwrap();
    assert!(h.store.list("tenant-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_is_tenant_scoped() {
    let h = Harness::new(embedder());
    h.ingestion
        .create_product_knowledge_space(product_input(CATALOG))
        .await
        .unwrap();
    let mut other = product_input(CATALOG);
    other.tenant_id = "tenant-2".to_string();
    h.ingestion.create_product_knowledge_space(other).await.unwrap();

    let listed = h.lifecycle.list("tenant-1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "Catalog");
    assert_eq!(listed[0].document_count, 2);
}

fn agent_input(knowledge_space_ids: Vec<&str>) -> CreateAgentInput {
    CreateAgentInput {
        tenant_id: "tenant-1".to_string(),
        agent_id: Some("helper".to_string()),
        name: "Helper".to_string(),
        knowledge_space_ids: knowledge_space_ids.into_iter().map(str::to_string).collect(),
        strict_rag: false,
    }
}

#[tokio::test]
async fn test_agent_registry_checks_links() {
    let h = Harness::new(embedder());
    let out = h
        .ingestion
        .create_product_knowledge_space(product_input(CATALOG))
        .await
        .unwrap();
    let ks_id = out.knowledge_space_id.as_str();
    let registry = AgentRegistry::new(h.store.clone(), h.store.clone());

    let err = registry
        .create(agent_input(vec![ks_id, "ks_missing"]), LinkCheck::Strict)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("ks_missing"));
    assert!(h.store.find_agent("tenant-1", "helper").await.unwrap().is_none());

    let agent = registry
        .create(agent_input(vec![ks_id, " ks_missing ", "ks_missing"]), LinkCheck::WarnOnly)
        .await
        .unwrap();
    assert_eq!(agent.knowledge_space_ids, vec![ks_id.to_string(), "ks_missing".to_string()]);
    assert_eq!(h.store.find_agent("tenant-1", "helper").await.unwrap(), Some(agent));
}

#[tokio::test]
async fn test_agent_registry_validates_input() {
    let h = Harness::new(embedder());
    let registry = AgentRegistry::new(h.store.clone(), h.store.clone());

    let mut blank = agent_input(vec!["ks_1"]);
    blank.name = " ".to_string();
    let err = registry.create(blank, LinkCheck::WarnOnly).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = registry
        .create(agent_input(vec![" "]), LinkCheck::WarnOnly)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("knowledgeSpaceIds"));

    let mut generated = agent_input(vec!["ks_1"]);
    generated.agent_id = None;
    let agent = registry.create(generated, LinkCheck::WarnOnly).await.unwrap();
    assert!(agent.id.starts_with("agent_"));
}
