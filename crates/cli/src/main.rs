//! Advisor CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: create the config file and data directory
//! - `status`: show configuration and store status
//! - `ingest`: ingest a document into memory
//! - `query`: ask a question in a conversation
//! - `conversations`: list saved conversations
//! - `delete-conversation`: remove a saved conversation
//! - `memory`: inspect and curate memory entries
//! - `audit`: export the audit log

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "advisor",
    about = "Advisor: retrieval-augmented memory and conversation engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.advisor/config.toml
    #[arg(long, global = true, env = "ADVISOR_CONFIG")]
    config: Option<PathBuf>,

    /// Name recorded in the audit log for changes made by this command
    #[arg(long, global = true, env = "ADVISOR_ACTOR", default_value = "cli")]
    actor: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and data directory
    Onboard,

    /// Show configuration and memory status
    Status,

    /// Ingest a document
    Ingest {
        #[arg(long)]
        customer: String,

        #[arg(long)]
        project: String,

        /// email, slack, document, meeting_notes, conversation or manual
        #[arg(long, default_value = "document")]
        source_type: String,

        /// Identifier of the source document (defaults to the job id)
        #[arg(long)]
        source_ref: Option<String>,

        /// Persona scopes allowed to see the chunks (comma separated)
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Read the document from a file
        #[arg(long, conflicts_with = "text", required_unless_present = "text")]
        file: Option<PathBuf>,

        /// Document text given inline
        #[arg(long)]
        text: Option<String>,
    },

    /// Ask a question, starting or continuing a conversation
    Query {
        text: String,

        /// Continue this conversation
        #[arg(long)]
        conversation: Option<String>,

        /// Persona for a new conversation, or switch to it before asking
        #[arg(long)]
        persona: Option<String>,

        /// Customer scope for a new conversation
        #[arg(long)]
        customer: Option<String>,

        /// Project scope for a new conversation
        #[arg(long)]
        project: Option<String>,

        /// Title for a new conversation
        #[arg(long)]
        title: Option<String>,
    },

    /// List conversations, most recently updated first
    Conversations {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Delete a saved conversation and its turns
    DeleteConversation { id: String },

    /// Memory management
    #[command(subcommand)]
    Memory(MemoryCommand),

    /// Audit log
    #[command(subcommand)]
    Audit(AuditCommand),
}

#[derive(Subcommand)]
pub enum MemoryCommand {
    /// List current entries
    List {
        #[arg(long)]
        customer: Option<String>,

        #[arg(long)]
        project: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Include superseded versions
        #[arg(long)]
        history: bool,

        /// Include deleted entries
        #[arg(long)]
        tombstoned: bool,

        /// Only entries reported stale
        #[arg(long)]
        stale: bool,
    },

    /// Add a single fact
    Add {
        text: String,

        #[arg(long)]
        customer: String,

        #[arg(long)]
        project: String,

        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Initial trust score (defaults to ingestion.manual_trust)
        #[arg(long)]
        trust: Option<f32>,
    },

    /// Correct an entry, creating a new version
    Update {
        id: String,

        /// The version you read; a newer version makes this fail
        #[arg(long)]
        version: u32,

        text: String,
    },

    /// Delete an entry
    Delete {
        id: String,

        #[arg(long)]
        reason: String,
    },

    /// Confirm an entry, raising its trust
    Confirm { id: String },

    /// Report an entry as possibly out of date
    Stale { id: String },

    /// Show one entry
    Get {
        id: String,

        /// Show every version of the fact
        #[arg(long)]
        history: bool,
    },

    /// Rank current entries against a query without generating a reply
    Search {
        query: String,

        #[arg(long)]
        customer: Option<String>,

        #[arg(long)]
        project: Option<String>,

        /// Maximum results (defaults to retrieval.top_k)
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Store statistics
    Stats,
}

#[derive(Subcommand)]
pub enum AuditCommand {
    /// Write the full audit log as JSONL
    Export { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Onboard => commands::onboard::run(config_path).await?,
        Commands::Status => commands::status::run(config_path).await?,
        Commands::Ingest {
            customer,
            project,
            source_type,
            source_ref,
            tags,
            file,
            text,
        } => {
            let args = commands::ingest::IngestArgs {
                customer,
                project,
                source_type,
                source_ref,
                tags,
                file,
                text,
            };
            commands::ingest::run(config_path, &cli.actor, args).await?
        }
        Commands::Query {
            text,
            conversation,
            persona,
            customer,
            project,
            title,
        } => {
            let args = commands::query::QueryArgs {
                text,
                conversation,
                persona,
                customer,
                project,
                title,
            };
            commands::query::run(config_path, args).await?
        }
        Commands::Conversations { limit, offset } => {
            commands::query::list(config_path, limit, offset).await?
        }
        Commands::DeleteConversation { id } => commands::query::delete(config_path, id).await?,
        Commands::Memory(cmd) => commands::memory::run(config_path, &cli.actor, cmd).await?,
        Commands::Audit(AuditCommand::Export { path }) => {
            commands::audit::export(config_path, &path).await?
        }
    }

    Ok(())
}
