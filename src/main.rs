//! # Webtrail CLI (`trail`)
//!
//! The `trail` binary drives the whole archive: database setup, queue
//! ingestion, search, grounded answers, blocklist management, embedding
//! maintenance, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! trail --config ./config/trail.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trail init` | Create the SQLite database and run schema migrations |
//! | `trail ingest` | Drain the capture queue into the archive |
//! | `trail search "<query>"` | Lexical, semantic, or hybrid search |
//! | `trail ask "<question>"` | Answer a question from archived pages |
//! | `trail get <id>` | Show one record |
//! | `trail forget <id>` | Delete one record |
//! | `trail block add <domain>` | Stop archiving a domain (and its subdomains) |
//! | `trail embed pending` | Embed records that have no vector yet |
//! | `trail summarize` | Generate summaries for records lacking one |
//! | `trail stats` | Archive statistics |
//! | `trail serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use webtrail::search::{FilterArgs, SearchArgs};
use webtrail::{ask, block, config, embed_cmd, get, ingest, migrate, search, server, stats, summarize};
use webtrail_core::search::SearchMode;

/// Webtrail: a local-first archive of your browsing activity.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/trail.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "trail",
    about = "Webtrail: search and ask questions about your browsing history",
    version,
    long_about = "Webtrail ingests page snapshots captured by the browser agent, classifies, \
    sanitizes, deduplicates, and embeds them, and serves hybrid (keyword + semantic) search \
    and grounded answers via a CLI and a local HTTP server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trail.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Safe to
    /// run repeatedly.
    Init,

    /// Drain the capture queue once.
    ///
    /// Classifies, extracts, sanitizes, deduplicates, and embeds every
    /// queued snapshot, then archives the raw lines and clears the queue.
    Ingest {
        /// Process and report without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search the archive.
    Search {
        /// Search query text.
        query: String,

        /// Search mode: `lexical`, `semantic`, or `hybrid`.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Maximum number of results (defaults to `retrieval.final_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Restrict to a category (repeatable).
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Restrict to a domain and its subdomains (repeatable).
        #[arg(long = "domain")]
        domains: Vec<String>,

        /// Only records captured at or after this time (YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        since: Option<String>,

        /// Only records captured before this time (YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        until: Option<String>,

        /// Deadline in seconds (defaults to `retrieval.timeout_secs`).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Ask a question answered from archived pages.
    Ask {
        question: String,

        /// Number of records fed to the model (defaults to `ask.result_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Deadline in seconds (defaults to `retrieval.timeout_secs`).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show a record by ID.
    Get { id: String },

    /// Delete a record by ID.
    Forget { id: String },

    /// Manage the domain blocklist.
    Block {
        #[command(subcommand)]
        action: BlockAction,
    },

    /// Manage record embeddings.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Generate summaries for records that lack one.
    Summarize {
        /// Maximum number of records to summarize.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show archive statistics.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum BlockAction {
    /// Block a domain and all its subdomains.
    Add {
        domain: String,

        /// Also delete records already stored for the domain.
        #[arg(long)]
        purge: bool,
    },
    /// Unblock a domain.
    Remove { domain: String },
    /// List blocked domains.
    List,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed records that have no vector yet.
    Pending {
        /// Maximum number of records to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (number of texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Delete and regenerate all embeddings.
    ///
    /// Useful when switching embedding models or dimensions.
    Rebuild {
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "webtrail=debug,webtrail_core=debug"
    } else {
        "webtrail=info,webtrail_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dry_run } => {
            ingest::run_ingest(&cfg, dry_run).await?;
        }
        Commands::Search {
            query,
            mode,
            limit,
            categories,
            domains,
            since,
            until,
            timeout,
        } => {
            let args = SearchArgs {
                query,
                mode: mode.parse::<SearchMode>()?,
                limit,
                filters: FilterArgs {
                    categories,
                    domains,
                    since,
                    until,
                },
                timeout_secs: timeout,
            };
            search::run_search(&cfg, args).await?;
        }
        Commands::Ask {
            question,
            limit,
            timeout,
        } => {
            ask::run_ask(&cfg, &question, limit, FilterArgs::default(), timeout).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Forget { id } => {
            get::run_forget(&cfg, &id).await?;
        }
        Commands::Block { action } => match action {
            BlockAction::Add { domain, purge } => {
                block::run_block_add(&cfg, &domain, purge).await?;
            }
            BlockAction::Remove { domain } => {
                block::run_block_remove(&cfg, &domain).await?;
            }
            BlockAction::List => {
                block::run_block_list(&cfg).await?;
            }
        },
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, batch_size } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Summarize { limit } => {
            summarize::run_summarize(&cfg, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
