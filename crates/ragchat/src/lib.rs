//! # ragchat
//!
//! **Multi-tenant retrieval-augmented chat over product catalogs and web pages.**
//!
//! This crate is the application around `ragchat-core`: configuration,
//! logging, the concrete HTTP and SQLite collaborators, the axum API and
//! the `ragchat` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ HTTP / CLI   │──▶│  ragchat-core  │──▶│ OpenAI API   │
//! │ (axum, clap) │   │  pipelines     │   │ Qdrant REST  │
//! └──────────────┘   └───────┬───────┘   └──────────────┘
//!                            ▼
//!                     ┌─────────────┐
//!                     │   SQLite    │
//!                     │  metadata   │
//!                     └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`telemetry`] | `tracing-subscriber` setup (pretty or JSON) |
//! | [`retry`] | Backoff policy shared by the HTTP clients |
//! | [`embedding`] | OpenAI-compatible embeddings client |
//! | [`llm`] | OpenAI-compatible chat-completions client |
//! | [`qdrant`] | Vector index over the Qdrant REST API |
//! | [`vector`] | Vector index selection (`qdrant`, `memory`, `disabled`) |
//! | [`fetcher`] | HTTP page fetcher and HTML text extraction |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`sqlite_store`] | SQLite knowledge-space, agent and conversation stores |
//! | [`context`] | Composition root wiring the pipelines |
//! | [`server`] | axum HTTP API, auth and request-id middleware |
//! | [`commands`] | CLI command implementations |

pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod fetcher;
pub mod llm;
pub mod migrate;
pub mod qdrant;
pub mod retry;
pub mod server;
pub mod sqlite_store;
pub mod telemetry;
pub mod vector;
