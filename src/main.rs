//! # Research Catalog CLI (`catalog`)
//!
//! Maintains a catalog of research papers and code repositories linked
//! by embedding similarity.
//!
//! ## Usage
//!
//! ```bash
//! catalog --config ./config/catalog.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `catalog init` | Create the SQLite database and schema |
//! | `catalog serve` | Start the HTTP API |
//! | `catalog ingest <kind>` | Run one ingestion pass for `papers` or `repos` |
//! | `catalog analyze <url>` | Catalogue a single link now |
//! | `catalog search "<query>"` | Hybrid search over the catalog |
//! | `catalog get <id>` | Show one item and its neighbors |
//! | `catalog stats` | Catalog counters |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `research_catalog=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use research_catalog::commands;
use research_catalog::config;
use research_catalog::models::NodeKind;
use research_catalog::server;

/// Research Catalog: a self-linking catalog of papers and repositories.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "catalog",
    about = "Research Catalog: papers and repositories linked by embedding similarity",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/catalog.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Safe to run repeatedly.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Fetch one batch from a feed and catalogue the new items.
    Ingest {
        /// `papers` or `repos`.
        kind: NodeKind,
    },

    /// Catalogue a single paper or repository link.
    ///
    /// GitHub links are treated as repositories, everything else as papers.
    Analyze {
        url: String,

        /// Title to use instead of the URL.
        #[arg(long)]
        title: Option<String>,

        /// Abstract or description handed to the enricher.
        #[arg(long)]
        text: Option<String>,
    },

    /// Search the catalog (lexical + embedding hybrid).
    Search {
        query: String,

        /// Restrict results to `papers` or `repos`.
        #[arg(long)]
        kind: Option<NodeKind>,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show an item with its similarity neighbors.
    Get { id: String },

    /// Show catalog counters.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("research_catalog=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Ingest { kind } => commands::run_ingest(&cfg, kind).await?,
        Commands::Analyze { url, title, text } => {
            commands::run_analyze(&cfg, &url, title, text).await?
        }
        Commands::Search { query, kind, limit } => {
            commands::run_search(&cfg, &query, kind, limit).await?
        }
        Commands::Get { id } => commands::run_get(&cfg, &id).await?,
        Commands::Stats => commands::run_stats(&cfg).await?,
    }

    Ok(())
}
