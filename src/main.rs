//! # wikidex CLI
//!
//! Indexes a repository of Markdown wiki pages: documents, the `[[link]]`
//! graph between them, and an embedding index for semantic search.
//!
//! ## Usage
//!
//! ```bash
//! wikidex --config ./config/wikidex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wikidex init` | Create the SQLite database and schema |
//! | `wikidex sync` | Full two-phase sync of the repository |
//! | `wikidex sync-file <path>` | Incremental sync of one file |
//! | `wikidex save <path>` | Write, commit and sync a document |
//! | `wikidex search "<query>"` | Semantic search |
//! | `wikidex get <path>` | Show a document |
//! | `wikidex links <path>` | Outgoing links and backlinks |
//! | `wikidex delete <id>` | Delete a document by id |
//! | `wikidex status` | Store counts |
//! | `wikidex watch` | Sync, then follow filesystem changes |
//! | `wikidex serve` | Start the HTTP API |
//!
//! Logs go to stderr and honour `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use wikidex::config::{load_config, Config};
use wikidex::migrate;
use wikidex::server;
use wikidex::sync::SyncEngine;
use wikidex::watch::WatchPipeline;

#[derive(Parser)]
#[command(
    name = "wikidex",
    about = "wikidex: link graph and semantic search over a Markdown wiki",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/wikidex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Full sync: every document is stubbed first, then resolved against
    /// the complete title/path map.
    Sync,

    /// Incremental sync of one repository-relative path.
    SyncFile { path: String },

    /// Save a document from a file or stdin, commit it, and sync it.
    Save {
        /// Repository-relative path of the document.
        path: String,

        /// Read content from this file instead of stdin.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Semantic search over chunk embeddings.
    Search {
        query: String,

        /// Maximum number of results (default: `[search].default_limit`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a document by path.
    Get { path: String },

    /// Print the outgoing links and backlinks of a document.
    Links { path: String },

    /// Delete a document by id.
    Delete { id: String },

    /// Print document, link and chunk counts.
    Status,

    /// Run a full sync, then watch the repository until Ctrl-C.
    Watch,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync => {
            let engine = SyncEngine::open(cfg).await?;
            let report = engine.sync_all().await?;
            engine.wait_idle().await;
            println!(
                "Synced {} documents ({} failed).",
                report.synced, report.failed
            );
        }
        Commands::SyncFile { path } => {
            let engine = SyncEngine::open(cfg).await?;
            let doc = engine.sync_one(&path, None).await?;
            engine.wait_idle().await;
            println!("Synced {} ({})", doc.path, doc.id);
        }
        Commands::Save { path, file } => {
            let content = match file {
                Some(file) => std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read stdin")?;
                    buf
                }
            };
            let engine = SyncEngine::open(cfg).await?;
            let doc = engine.save(&path, &content).await?;
            engine.wait_idle().await;
            println!("Saved {} ({})", doc.path, doc.id);
            if let Some(rev) = &doc.revision {
                println!("Revision: {}", rev);
            }
        }
        Commands::Search { query, limit } => {
            let limit = limit.unwrap_or(cfg.search.default_limit);
            let engine = SyncEngine::open(cfg).await?;
            let hits = engine.search(&query, limit).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} ({}) #{}",
                    rank + 1,
                    hit.similarity,
                    hit.document.title,
                    hit.document.path,
                    hit.chunk_index
                );
                println!("   {}", snippet(&hit.chunk_text, 160));
            }
        }
        Commands::Get { path } => {
            let engine = SyncEngine::open(cfg).await?;
            match engine.get_by_path(&path).await? {
                Some(doc) => {
                    println!("Title:    {}", doc.title);
                    println!("Path:     {}", doc.path);
                    println!("ID:       {}", doc.id);
                    println!(
                        "Revision: {}",
                        doc.revision.as_deref().unwrap_or("(none)")
                    );
                    if let Some(category) = &doc.category {
                        println!("Category: {}", category);
                    }
                    println!();
                    println!("{}", doc.content);
                }
                None => anyhow::bail!("Document not found: {}", path),
            }
        }
        Commands::Links { path } => {
            let engine = SyncEngine::open(cfg).await?;
            print_links(&engine, &path).await?;
        }
        Commands::Delete { id } => {
            let engine = SyncEngine::open(cfg).await?;
            if engine.delete(&id).await? {
                println!("Deleted {}", id);
            } else {
                anyhow::bail!("Document not found: {}", id);
            }
        }
        Commands::Status => {
            let engine = SyncEngine::open(cfg).await?;
            let stats = engine.stats().await?;
            println!("Documents:        {}", stats.documents);
            println!(
                "Links:            {} ({} missing)",
                stats.links, stats.missing_links
            );
            println!(
                "Chunks:           {} ({} embedded)",
                stats.chunks, stats.embedded_chunks
            );
        }
        Commands::Watch => run_watch(cfg).await?,
        Commands::Serve => {
            let engine = Arc::new(SyncEngine::open(cfg).await?);
            server::run_server(engine).await?;
        }
    }

    Ok(())
}

async fn print_links(engine: &SyncEngine, path: &str) -> Result<()> {
    let doc = engine
        .get_by_path(path)
        .await?
        .with_context(|| format!("Document not found: {}", path))?;

    let outgoing = engine.outgoing(&doc.id).await?;
    println!("Outgoing ({}):", outgoing.len());
    for link in &outgoing {
        let target = match &link.target_id {
            Some(id) => match engine.get(id).await? {
                Some(target) => target.path,
                None => format!("{} (stale)", id),
            },
            None => "(missing)".to_string(),
        };
        println!("  [[{}]] \"{}\" -> {}", link.target_path, link.link_text, target);
    }

    let backlinks = engine.backlinks(&doc.id).await?;
    println!("Backlinks ({}):", backlinks.len());
    for link in &backlinks {
        let source = engine
            .get(&link.source_id)
            .await?
            .map(|d| d.path)
            .unwrap_or_else(|| link.source_id.clone());
        println!("  {} \"{}\"", source, link.link_text);
    }
    Ok(())
}

async fn run_watch(cfg: Config) -> Result<()> {
    let engine = Arc::new(SyncEngine::open(cfg).await?);
    let report = engine.sync_all().await?;
    println!(
        "Synced {} documents ({} failed). Watching for changes, Ctrl-C to stop.",
        report.synced, report.failed
    );

    let mut pipeline = WatchPipeline::new(engine.clone());
    pipeline.start()?;
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    pipeline.stop();
    engine.wait_idle().await;
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
