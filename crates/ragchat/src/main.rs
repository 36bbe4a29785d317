//! # ragchat CLI
//!
//! The `ragchat` binary runs the HTTP service and exposes the same
//! pipelines as one-shot commands.
//!
//! ## Usage
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat init` | Create the SQLite database and run schema migrations |
//! | `ragchat serve` | Start the HTTP API |
//! | `ragchat ingest products <file>` | Create a product knowledge space from a markdown catalog |
//! | `ragchat ingest web <url>...` | Create a web knowledge space from pages |
//! | `ragchat agent create` | Create or update an agent |
//! | `ragchat knowledge list` | List a tenant's knowledge spaces |
//! | `ragchat knowledge delete <id>` | Delete a knowledge space and its vectors |
//! | `ragchat chat "<message>"` | Ask an agent one question |
//!
//! ## Examples
//!
//! ```bash
//! ragchat init
//! ragchat ingest products ./catalog.md --tenant acme --name "Spring catalog"
//! ragchat agent create --tenant acme --name "Shop assistant" --id shop \
//!     --knowledge-space <knowledge-space-id> --strict
//! ragchat chat --tenant acme --agent shop "How much are the trail runners?"
//! ragchat serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ragchat::commands::{self, ChatArgs};
use ragchat::config;
use ragchat::context::AppContext;
use ragchat::{migrate, server, telemetry};

/// ragchat: multi-tenant RAG chat over product catalogs and web pages.
#[derive(Parser)]
#[command(name = "ragchat", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Create a knowledge space from a source.
    Ingest {
        #[command(subcommand)]
        source: IngestSource,
    },

    /// Manage agents.
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// List or delete knowledge spaces.
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },

    /// Send one message to an agent and print the answer.
    Chat {
        #[arg(long)]
        tenant: String,

        /// Agent id (the `model` of an API request).
        #[arg(long)]
        agent: String,

        #[arg(long, default_value = "cli")]
        user: String,

        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<String>,

        /// Print the answer as SSE frames instead of a JSON completion.
        #[arg(long)]
        stream: bool,

        message: String,
    },
}

#[derive(Subcommand)]
enum IngestSource {
    /// Parse a product markdown file (`--- item start ---` blocks).
    Products {
        file: PathBuf,

        #[arg(long)]
        tenant: String,

        #[arg(long)]
        name: String,
    },

    /// Fetch and chunk web pages.
    Web {
        #[arg(required = true)]
        urls: Vec<String>,

        #[arg(long)]
        tenant: String,

        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Create an agent linked to one or more knowledge spaces.
    Create {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        name: String,

        /// Agent id; generated when omitted.
        #[arg(long)]
        id: Option<String>,

        #[arg(long = "knowledge-space", required = true)]
        knowledge_spaces: Vec<String>,

        /// Answer with the no-information sentence instead of calling the
        /// model when nothing relevant is retrieved.
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum KnowledgeAction {
    /// List knowledge spaces, newest first.
    List {
        #[arg(long)]
        tenant: String,
    },

    /// Delete a knowledge space's vectors and metadata.
    Delete {
        knowledge_space_id: String,

        #[arg(long)]
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    telemetry::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { source } => {
            let ctx = AppContext::from_config(&cfg).await?;
            match source {
                IngestSource::Products { file, tenant, name } => {
                    commands::ingest_products(&ctx, &tenant, &name, &file).await?;
                }
                IngestSource::Web { urls, tenant, name } => {
                    commands::ingest_web(&ctx, &tenant, &name, urls).await?;
                }
            }
        }
        Commands::Agent {
            action:
                AgentAction::Create {
                    tenant,
                    name,
                    id,
                    knowledge_spaces,
                    strict,
                },
        } => {
            let ctx = AppContext::from_config(&cfg).await?;
            commands::create_agent(&ctx, &tenant, &name, id, knowledge_spaces, strict).await?;
        }
        Commands::Knowledge { action } => {
            let ctx = AppContext::from_config(&cfg).await?;
            match action {
                KnowledgeAction::List { tenant } => {
                    commands::list_knowledge(&ctx, &tenant).await?;
                }
                KnowledgeAction::Delete {
                    knowledge_space_id,
                    tenant,
                } => {
                    commands::delete_knowledge(&ctx, &tenant, &knowledge_space_id).await?;
                }
            }
        }
        Commands::Chat {
            tenant,
            agent,
            user,
            conversation,
            stream,
            message,
        } => {
            let ctx = AppContext::from_config(&cfg).await?;
            commands::chat(
                &ctx,
                ChatArgs {
                    tenant,
                    user,
                    agent,
                    conversation,
                    message,
                    stream,
                },
            )
            .await?;
        }
    }

    Ok(())
}
