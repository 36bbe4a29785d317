//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/v1/chat/completions` | OpenAI-compatible chat, JSON or SSE (`stream: true`) |
//! | `POST` | `/v1/knowledge/create` | Multipart `{name, file}` or JSON `{name, sourceUrls}` |
//! | `GET`  | `/v1/knowledge/list` | Knowledge spaces of the caller's tenant |
//! | `DELETE` | `/v1/knowledge/{id}` | Delete a knowledge space (204) |
//! | `POST` | `/v1/agent/create` | JSON `{name, knowledgeSpaceIds, strictRag?, agentId?}` |
//! | `GET`  | `/health` | Health check (no auth) |
//!
//! # Authentication
//!
//! Every `/v1` route needs `Authorization: Bearer <key>` or `x-api-key:
//! <key>` matching an `[[auth.api_keys]]` entry. The entry supplies the
//! tenant and user for the request. Rejections are logged at `warn`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "agent 'x' not found", "request_id": "..." } }
//! ```
//!
//! Codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `dependency_error` (500), `configuration_error` (500), `internal` (500),
//! `timeout` (504). Dependency failures carry a generic message; the
//! detail only goes to the log.
//!
//! # Streaming
//!
//! The chat pipeline runs to completion before the response starts, so
//! any pipeline failure still gets a proper status code. Once headers are
//! sent, an encoding failure becomes an error frame followed by
//! `data: [DONE]`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::Instrument;

use ragchat_core::agents::{CreateAgentInput, LinkCheck};
use ragchat_core::ingest::{
    CreateKnowledgeSpaceInput, CreateKnowledgeSpaceOutput, CreateWebKnowledgeSpaceInput,
};
use ragchat_core::lifecycle::KnowledgeSpaceSummary;
use ragchat_core::models::{Agent, ChatMessage};
use ragchat_core::retrieval::ChatRequest;
use ragchat_core::sse::{StreamEncoder, StreamMeta, StreamOptions};
use ragchat_core::{ErrorKind, RagError};

use crate::config::Config;
use crate::context::AppContext;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Identity resolved from the presented API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub tenant_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone)]
struct RequestId(String);

#[derive(Clone)]
struct AppState {
    ctx: Arc<AppContext>,
    keys: Arc<HashMap<String, Caller>>,
}

impl AppState {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.config.server.request_timeout_secs)
    }
}

/// Build the full router over an assembled context.
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let keys: HashMap<String, Caller> = ctx
        .config
        .auth
        .api_keys
        .iter()
        .map(|k| {
            (
                k.key.clone(),
                Caller {
                    tenant_id: k.tenant_id.clone(),
                    user_id: k.user_id.clone(),
                },
            )
        })
        .collect();
    let state = AppState {
        ctx,
        keys: Arc::new(keys),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/v1/chat/completions", post(handle_chat))
        .route("/v1/knowledge/create", post(handle_knowledge_create))
        .route("/v1/knowledge/list", get(handle_knowledge_list))
        .route(
            "/v1/knowledge/{knowledge_space_id}",
            delete(handle_knowledge_delete),
        )
        .route("/v1/agent/create", post(handle_agent_create))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .route("/health", get(handle_health))
        .merge(api)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(middleware::from_fn(request_context))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `[server].bind` until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ctx = Arc::new(AppContext::from_config(config).await?);
    if config.auth.api_keys.is_empty() {
        tracing::warn!("no [[auth.api_keys]] configured; every /v1 request will be rejected");
    }

    let app = build_router(ctx);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "ragchat listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}

// ============ Middleware ============

async fn request_context(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    let started = Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;
    span.in_scope(|| {
        tracing::info!(
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request finished"
        )
    });

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    bearer.or_else(|| {
        headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    })
}

async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let request_id = req.extensions().get::<RequestId>().cloned();
    let caller = presented_key(req.headers())
        .filter(|k| !k.is_empty())
        .and_then(|k| state.keys.get(k))
        .cloned();

    match caller {
        Some(caller) => {
            req.extensions_mut().insert(caller);
            Ok(next.run(req).await)
        }
        None => {
            let reason = if presented_key(req.headers()).is_some() {
                "unknown api key"
            } else {
                "missing credentials"
            };
            tracing::warn!(security = true, reason, "unauthorized request rejected");
            Err(AppError::from_rag(
                RagError::Unauthorized("missing or invalid API key".to_string()),
                request_id.as_ref(),
            ))
        }
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    request_id: Option<String>,
}

/// Error that renders as the JSON error contract.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    request_id: Option<String>,
}

impl AppError {
    fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        request_id: Option<&RequestId>,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            request_id: request_id.map(|r| r.0.clone()),
        }
    }

    fn bad_request(message: impl Into<String>, request_id: &RequestId) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message, Some(request_id))
    }

    fn timeout(request_id: &RequestId) -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            "timeout",
            "request deadline exceeded",
            Some(request_id),
        )
    }

    fn from_rag(err: RagError, request_id: Option<&RequestId>) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::Validation | ErrorKind::ParseItem => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Dependency | ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match kind {
            ErrorKind::Dependency => {
                tracing::error!(error = ?err, retryable = err.is_retryable(), "dependency failure");
                "An upstream dependency failed. Please retry later.".to_string()
            }
            ErrorKind::Config => {
                tracing::error!(error = %err, "configuration error");
                err.to_string()
            }
            _ => err.to_string(),
        };
        Self::new(status, kind.code(), message, request_id)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                request_id: self.request_id,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Run `fut` under the request deadline, mapping pipeline errors.
async fn with_deadline<T, F>(state: &AppState, request_id: &RequestId, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, RagError>>,
{
    match tokio::time::timeout(state.timeout(), fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(AppError::from_rag(err, Some(request_id))),
        Err(_) => {
            tracing::warn!(timeout_secs = state.timeout().as_secs(), "request deadline exceeded");
            Err(AppError::timeout(request_id))
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ POST /v1/chat/completions ============

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    /// Agent id.
    #[serde(default)]
    model: String,
    #[serde(default)]
    messages: Vec<ChatMessage>,
    #[serde(default)]
    stream: bool,
    #[serde(default, alias = "conversationId")]
    conversation_id: Option<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: ChatCompletionRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("malformed request body: {}", e), &request_id))?;

    tracing::info!(
        tenant_id = %caller.tenant_id,
        agent_id = %request.model,
        stream = request.stream,
        message_count = request.messages.len(),
        "chat request"
    );

    let completion = with_deadline(
        &state,
        &request_id,
        state.ctx.chat.execute(ChatRequest {
            tenant_id: caller.tenant_id,
            user_id: caller.user_id,
            agent_id: request.model,
            messages: request.messages,
            conversation_id: request.conversation_id,
            request_id: Some(request_id.0.clone()),
        }),
    )
    .await?;

    if !request.stream {
        return Ok(Json(completion).into_response());
    }

    let message = completion.message().cloned().ok_or_else(|| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "completion had no message",
            Some(&request_id),
        )
    })?;
    let encoder = StreamEncoder::new(StreamMeta {
        id: completion.id,
        model: completion.model,
        created: Some(completion.created),
    });
    let frames = encoder
        .frames(
            message.content,
            StreamOptions {
                include_done_message: true,
                cited_urls: message.cited_urls,
                is_rag: Some(message.is_rag),
                chunk_bytes: state.ctx.config.streaming.chunk_bytes,
            },
        )
        .map_err(|e| {
            tracing::error!(error = %e, "stream setup failed");
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "failed to start response stream",
                Some(&request_id),
            )
        })?;

    let body = Body::from_stream(tokio_stream::iter(
        frames.recovering().map(Ok::<_, Infallible>),
    ));
    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

// ============ POST /v1/knowledge/create ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWebRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    source_urls: Vec<String>,
}

struct Upload {
    name: String,
    file_content: String,
}

async fn read_upload(mut multipart: Multipart, request_id: &RequestId) -> Result<Upload, AppError> {
    let mut name = None;
    let mut file_content = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.body_text(), request_id))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("name") => {
                name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::bad_request(e.body_text(), request_id))?,
                );
            }
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::bad_request(e.body_text(), request_id))?;
                let text = String::from_utf8(bytes.to_vec()).map_err(|_| {
                    AppError::bad_request("file must be UTF-8 text", request_id)
                })?;
                file_content = Some(text);
            }
            _ => {}
        }
    }

    let file_content =
        file_content.ok_or_else(|| AppError::bad_request("file is required", request_id))?;
    Ok(Upload {
        name: name.unwrap_or_default(),
        file_content,
    })
}

fn validate_source_urls(urls: &[String]) -> Result<(), String> {
    for raw in urls {
        match url::Url::parse(raw) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => return Err(format!("invalid source URL: {}", raw)),
        }
    }
    Ok(())
}

async fn handle_knowledge_create(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Extension(request_id): Extension<RequestId>,
    request: Request,
) -> Result<Json<CreateKnowledgeSpaceOutput>, AppError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("multipart/form-data"))
        .unwrap_or(false);

    let output = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::bad_request(e.body_text(), &request_id))?;
        let upload = read_upload(multipart, &request_id).await?;
        with_deadline(
            &state,
            &request_id,
            state
                .ctx
                .ingestion
                .create_product_knowledge_space(CreateKnowledgeSpaceInput {
                    tenant_id: caller.tenant_id,
                    name: upload.name,
                    file_content: upload.file_content,
                    request_id: Some(request_id.0.clone()),
                }),
        )
        .await?
    } else {
        let body = Bytes::from_request(request, &state)
            .await
            .map_err(|e| AppError::bad_request(e.body_text(), &request_id))?;
        let create: CreateWebRequest = serde_json::from_slice(&body).map_err(|e| {
            AppError::bad_request(format!("malformed request body: {}", e), &request_id)
        })?;
        validate_source_urls(&create.source_urls)
            .map_err(|msg| AppError::bad_request(msg, &request_id))?;
        with_deadline(
            &state,
            &request_id,
            state
                .ctx
                .ingestion
                .create_web_knowledge_space(CreateWebKnowledgeSpaceInput {
                    tenant_id: caller.tenant_id,
                    name: create.name,
                    source_urls: create.source_urls,
                    request_id: Some(request_id.0.clone()),
                }),
        )
        .await?
    };

    Ok(Json(output))
}

// ============ GET /v1/knowledge/list ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KnowledgeListResponse {
    knowledge_spaces: Vec<KnowledgeSpaceSummary>,
}

async fn handle_knowledge_list(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<KnowledgeListResponse>, AppError> {
    let knowledge_spaces = with_deadline(
        &state,
        &request_id,
        state.ctx.lifecycle.list(&caller.tenant_id),
    )
    .await?;
    Ok(Json(KnowledgeListResponse { knowledge_spaces }))
}

// ============ DELETE /v1/knowledge/{id} ============

async fn handle_knowledge_delete(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Extension(request_id): Extension<RequestId>,
    Path(knowledge_space_id): Path<String>,
) -> Result<StatusCode, AppError> {
    with_deadline(
        &state,
        &request_id,
        state
            .ctx
            .lifecycle
            .delete(&caller.tenant_id, &knowledge_space_id),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /v1/agent/create ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAgentRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    knowledge_space_ids: Vec<String>,
    #[serde(default)]
    strict_rag: bool,
    #[serde(default)]
    agent_id: Option<String>,
}

async fn handle_agent_create(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Result<Json<Agent>, AppError> {
    let create: CreateAgentRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("malformed request body: {}", e), &request_id))?;

    let agent = with_deadline(
        &state,
        &request_id,
        state.ctx.agents.create(
            CreateAgentInput {
                tenant_id: caller.tenant_id,
                agent_id: create.agent_id,
                name: create.name,
                knowledge_space_ids: create.knowledge_space_ids,
                strict_rag: create.strict_rag,
            },
            LinkCheck::Strict,
        ),
    )
    .await?;
    Ok(Json(agent))
}
