//! # ragchat core
//!
//! Shared logic for ragchat: data models, the product markdown parser,
//! chunk building, the ingestion and retrieval pipelines, SSE frame
//! encoding, knowledge-space lifecycle, and the collaborator traits those
//! pipelines are written against.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! Every external system (embedding model, language model, vector index,
//! metadata store, page fetcher) is reached through a trait defined here,
//! with in-memory implementations in [`store::memory`] for tests.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`parser`] | Delimited product markdown into [`models::Product`]s |
//! | [`chunk`] | Products and crawled pages into indexable chunks |
//! | [`ingest`] | Knowledge-space creation from files or URLs |
//! | [`retrieval`] | Chat completion over one or more knowledge spaces |
//! | [`sse`] | OpenAI-compatible `chat.completion.chunk` frames |
//! | [`lifecycle`] | Listing and deleting knowledge spaces |
//! | [`agents`] | Validated agent creation |

pub mod agents;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod lifecycle;
pub mod llm;
pub mod models;
pub mod parser;
pub mod retrieval;
pub mod sse;
pub mod store;

pub use error::{ErrorKind, RagError};
