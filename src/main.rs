//! # Exopedia CLI (`exopedia`)
//!
//! Operates an Exopedia instance: initialize the database, seed pages, run
//! the HTTP server that resolves red links, and inspect pages, indices, and
//! creation jobs.
//!
//! ## Usage
//!
//! ```bash
//! exopedia --config ./config/exopedia.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `exopedia init` | Create the SQLite database and run schema migrations |
//! | `exopedia seed <file.md>` | Persist a page from a markdown file |
//! | `exopedia serve` | Start the HTTP server |
//! | `exopedia get <slug>` | Print a page's metadata and markdown |
//! | `exopedia search "<query>"` | Query the page or content index |
//! | `exopedia queue <id>` | Print a creation job and its log |
//! | `exopedia embed backfill` | Fill missing summary and chunk embeddings |
//! | `exopedia jobs reconcile` | Fail jobs stuck past the run ceiling |
//!
//! ## Examples
//!
//! ```bash
//! exopedia init
//! exopedia seed ./seed/saturn.md --slug saturn
//! exopedia search "타이탄의 메탄 바다" --index content
//! RUST_LOG=exopedia=debug exopedia serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use exopedia::search::SearchIndex;
use exopedia::{config, embed_cmd, get, migrate, queue_cmd, search, seed, server};

/// Exopedia: an AI-written wiki of the year 3025 that drafts its red-linked
/// pages on demand.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/exopedia.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "exopedia",
    about = "Exopedia: an AI-written wiki that writes its red-linked pages on demand",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/exopedia.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it on an existing database is safe.
    Init,

    /// Persist a page from a markdown file.
    ///
    /// Title and summary default to the file's first heading and first
    /// paragraph; the slug defaults to the file name.
    Seed {
        /// Markdown file to import.
        file: PathBuf,

        /// Proposed slug. Canonicalized, and suffixed on collision.
        #[arg(long)]
        slug: Option<String>,

        #[arg(long)]
        title: Option<String>,

        /// One-paragraph summary; the page's semantic fingerprint.
        #[arg(long)]
        summary: Option<String>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print a page by slug.
    Get { slug: String },

    /// Query the page index (summaries) or the content index (chunks).
    ///
    /// Requires an embedding provider.
    Search {
        query: String,

        #[arg(long, value_enum, default_value = "pages")]
        index: SearchIndex,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum similarity for page results (0.0 to 1.0).
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Print a creation job and its log.
    Queue { id: String },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Maintain creation jobs.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed page summaries and content chunks that have no vector yet.
    Backfill {
        /// Override `[embedding].batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Skip content chunks.
        #[arg(long)]
        summaries_only: bool,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// Mark queued or running jobs older than the run ceiling as failed.
    Reconcile {
        /// Override `[jobs].max_duration_secs`.
        #[arg(long)]
        max_age_secs: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("exopedia=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Seed {
            file,
            slug,
            title,
            summary,
        } => {
            seed::run_seed(&cfg, &file, slug, title, summary).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Get { slug } => {
            get::run_get(&cfg, &slug).await?;
        }
        Commands::Search {
            query,
            index,
            limit,
            threshold,
        } => {
            search::run_search(&cfg, &query, index, limit, threshold).await?;
        }
        Commands::Queue { id } => {
            queue_cmd::run_queue(&cfg, &id).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Backfill {
                batch_size,
                summaries_only,
            } => {
                embed_cmd::run_embed_backfill(&cfg, batch_size, summaries_only).await?;
            }
        },
        Commands::Jobs { action } => match action {
            JobsAction::Reconcile { max_age_secs } => {
                queue_cmd::run_reconcile(&cfg, max_age_secs).await?;
            }
        },
    }

    Ok(())
}
