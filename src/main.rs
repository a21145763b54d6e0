//! # Reply Harness CLI (`rpl`)
//!
//! The `rpl` binary is the primary interface for Reply Harness. It
//! provides commands for database initialization, email ingestion,
//! retrieval, context assembly, embedding management, and reply drafting.
//!
//! ## Usage
//!
//! ```bash
//! rpl --config ./config/reply.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rpl init` | Create the SQLite database and run schema migrations |
//! | `rpl ingest <path>` | Ingest a `.eml` file or a folder of them |
//! | `rpl search "<query>"` | Semantic search over indexed mails |
//! | `rpl get <message-id>` | Print a canonical email record |
//! | `rpl thread <message-id>` | Reconstruct the conversation before a mail |
//! | `rpl conversation <a> <b>` | List the mails of a correspondent pair |
//! | `rpl senders` | List distinct sender addresses |
//! | `rpl profile <a> <b>` | Print a sender's stylometric profile |
//! | `rpl assemble` | Assemble a reply context and print it as JSON |
//! | `rpl draft` | Assemble a context and generate a reply draft |
//! | `rpl update <message-id>` | Replace a mail's body and re-embed it |
//! | `rpl remove <message-id>` | Delete a mail from store and index |
//! | `rpl embed pending` | Backfill missing or stale embeddings |
//! | `rpl embed rebuild` | Delete and regenerate all embeddings |

mod assemble;
mod config;
mod db;
mod embed_cmd;
mod embedding;
mod generate;
mod get;
mod index;
mod ingest;
mod migrate;
mod models;
mod normalize;
mod store;
mod stylometry;
mod thread;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Reply Harness CLI — a local-first email ingestion and retrieval
/// engine for style-matched reply drafting.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "rpl",
    about = "Reply Harness — email ingestion and retrieval for style-matched reply drafting",
    version,
    long_about = "Reply Harness parses raw email data into canonical records, stores and \
    deduplicates them in SQLite, indexes their content for semantic similarity search, and \
    assembles thread history, similar past mails, and stylometric features into a context \
    for a downstream reply generator."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/reply.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (emails, email_vectors, embeddings). Idempotent.
    Init,

    /// Ingest a `.eml` file or a folder of them.
    ///
    /// Parses each mail, skips duplicates, and reports a per-file tally
    /// of inserted / skipped / failed. With an embedding provider
    /// configured, mails are embedded inline (best effort).
    Ingest {
        /// Path to a `.eml` file or a directory containing them.
        path: PathBuf,

        /// Treat inputs as flat key/value-headered text (bulk corpus
        /// dumps) instead of MIME; no extension gate applies.
        #[arg(long)]
        flat: bool,

        /// Maximum number of mails to insert.
        #[arg(long)]
        limit: Option<usize>,

        /// Parse and count without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Semantic search over indexed mails.
    ///
    /// Requires an embedding provider. Results are ordered by ascending
    /// distance (lower = more similar).
    Search {
        /// The search query string.
        query: String,

        /// Restrict results to mails written by this sender.
        #[arg(long)]
        sender: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a canonical email record by message id.
    Get {
        /// Message id (as stored, e.g. `<msg-001@example.com>`).
        message_id: String,
    },

    /// Reconstruct the conversation leading up to a stored mail.
    ///
    /// Uses the References chain when present, otherwise falls back to
    /// subject matching with reply prefixes stripped.
    Thread {
        /// Message id of the mail whose thread to resolve.
        message_id: String,
    },

    /// List the mails of a correspondent pair, most recent first.
    Conversation {
        /// Sender address.
        sender: String,

        /// Receiver address.
        receiver: String,

        /// Maximum number of mails to list.
        #[arg(long, default_value_t = 10)]
        limit: i64,

        /// Match both directions instead of sender → receiver only.
        #[arg(long)]
        bidirectional: bool,
    },

    /// List distinct sender addresses in the corpus.
    Senders,

    /// Print the stylometric profile of a correspondent pair.
    ///
    /// Requires a POS tagger (`[stylometry]` in config).
    Profile {
        /// The author whose style is profiled.
        sender: String,

        /// The correspondent the window is restricted to.
        receiver: String,
    },

    /// Assemble a reply context and print it as JSON.
    Assemble {
        /// Address the reply will be sent from (style source).
        #[arg(long = "from")]
        sender: String,

        /// The correspondent being replied to.
        #[arg(long = "to")]
        receiver: String,

        /// File containing the incoming mail body.
        #[arg(long)]
        file: PathBuf,

        /// Message id of the stored mail being replied to (thread hint).
        #[arg(long)]
        reply_to: Option<String>,
    },

    /// Assemble a context and generate a reply draft.
    ///
    /// Requires a generator (`[generator]` in config). The generator is
    /// called exactly once; failures are reported, never retried.
    Draft {
        /// Address the reply will be sent from (style source).
        #[arg(long = "from")]
        sender: String,

        /// The correspondent being replied to.
        #[arg(long = "to")]
        receiver: String,

        /// File containing the incoming mail body.
        #[arg(long)]
        file: PathBuf,

        /// Message id of the stored mail being replied to (thread hint).
        #[arg(long)]
        reply_to: Option<String>,

        /// Extra instructions appended to the prompt.
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Replace a stored mail's body and re-embed it.
    Update {
        /// Message id of the mail to update.
        message_id: String,

        /// File containing the replacement body.
        #[arg(long)]
        file: PathBuf,
    },

    /// Delete a mail from the store and the index.
    Remove {
        /// Message id of the mail to delete.
        message_id: String,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed mails that are missing or have stale embeddings.
    Pending {
        /// Maximum number of mails to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings.
    ///
    /// Useful when switching embedding models or dimensions.
    Rebuild {
        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            flat,
            limit,
            dry_run,
        } => {
            let format = if flat {
                ingest::IngestFormat::Flat
            } else {
                ingest::IngestFormat::Eml
            };
            ingest::run_ingest(&cfg, &path, format, limit, dry_run).await?;
        }
        Commands::Search {
            query,
            sender,
            limit,
        } => {
            index::run_search(&cfg, &query, sender, limit).await?;
        }
        Commands::Get { message_id } => {
            get::run_get(&cfg, &message_id).await?;
        }
        Commands::Thread { message_id } => {
            thread::run_thread(&cfg, &message_id).await?;
        }
        Commands::Conversation {
            sender,
            receiver,
            limit,
            bidirectional,
        } => {
            get::run_conversation(&cfg, &sender, &receiver, limit, bidirectional).await?;
        }
        Commands::Senders => {
            get::run_senders(&cfg).await?;
        }
        Commands::Profile { sender, receiver } => {
            stylometry::run_profile(&cfg, &sender, &receiver).await?;
        }
        Commands::Assemble {
            sender,
            receiver,
            file,
            reply_to,
        } => {
            let content = std::fs::read_to_string(&file)?;
            assemble::run_assemble(&cfg, &sender, &receiver, &content, reply_to).await?;
        }
        Commands::Draft {
            sender,
            receiver,
            file,
            reply_to,
            prompt,
        } => {
            let content = std::fs::read_to_string(&file)?;
            generate::run_draft(&cfg, &sender, &receiver, &content, reply_to, prompt).await?;
        }
        Commands::Update { message_id, file } => {
            ingest::run_update(&cfg, &message_id, &file).await?;
        }
        Commands::Remove { message_id } => {
            ingest::run_remove(&cfg, &message_id).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
    }

    Ok(())
}
