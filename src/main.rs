//! # docshelf CLI (`shelf`)
//!
//! The `shelf` binary is the primary interface for docshelf. It provides
//! commands for database initialization, document ingestion, hybrid search,
//! status inspection, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! shelf --config ./config/shelf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shelf init` | Create the SQLite database and run schema migrations |
//! | `shelf ingest <path>` | Parse, chunk, embed, and index a document |
//! | `shelf search "<query>"` | Hybrid search over indexed documents |
//! | `shelf status <doc_id>` | Show one document's processing status |
//! | `shelf list` | List documents for an owner |
//! | `shelf serve http` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! shelf init --config ./config/shelf.toml
//!
//! # Ingest a PDF for a tenant
//! shelf ingest report.pdf --owner acme --config ./config/shelf.toml
//!
//! # Hybrid search
//! shelf search "quarterly revenue" --owner acme --config ./config/shelf.toml
//!
//! # Start the HTTP server
//! shelf serve http --config ./config/shelf.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use docshelf::config::{self, Config};
use docshelf::db;
use docshelf::docs;
use docshelf::embed::HttpEmbedder;
use docshelf::ingest::{IngestRequest, IngestionPipeline};
use docshelf::migrate;
use docshelf::models::DocumentStatus;
use docshelf::parse::{Capabilities, Format, FormatParser};
use docshelf::search::{HybridSearchEngine, SearchFilters};
use docshelf::server::{self, AppState};
use docshelf::store::FsObjectStore;

/// docshelf CLI — a local-first document ingestion and hybrid retrieval
/// service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/shelf.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "shelf",
    about = "docshelf — multi-format document ingestion and hybrid retrieval",
    version,
    long_about = "docshelf ingests heterogeneous documents (PDF, DOCX, HTML, spreadsheets, \
    presentations, images, plain text), normalizes them into ordered text chunks, attaches \
    vector embeddings from an external inference endpoint, and serves hybrid (keyword + \
    semantic) search scoped per owner, via a CLI and an HTTP server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/shelf.toml")]
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
    /// (documents, chunks, embeddings, chunks_fts). This command is
    /// idempotent — running it multiple times is safe.
    Init,

    /// Ingest a document from a local file.
    ///
    /// Parses the file, splits the normalized text into chunks, embeds
    /// them via the configured inference endpoint, and stores everything
    /// in SQLite. Prints the terminal status of the attempt.
    Ingest {
        /// Path to the document.
        path: PathBuf,

        /// Owner (tenant) the document belongs to.
        #[arg(long)]
        owner: String,

        /// Document id for this attempt. Defaults to a fresh UUID.
        /// Ids are attempt-unique: retry a failed ingest with a new id.
        #[arg(long)]
        doc_id: Option<String>,

        /// Declared content type. Defaults to a guess from the extension.
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Search indexed documents.
    ///
    /// Runs the lexical and vector sub-queries concurrently and prints
    /// merged, ranked results.
    Search {
        /// The search query string.
        query: String,

        /// Owner (tenant) to search within.
        #[arg(long)]
        owner: String,

        /// Maximum number of results to return.
        #[arg(long)]
        top_k: Option<i64>,

        /// Restrict to specific document ids (repeatable).
        #[arg(long = "doc-id")]
        doc_ids: Vec<String>,
    },

    /// Show one document's processing status.
    Status {
        /// Document id.
        doc_id: String,

        /// Owner (tenant) the document belongs to.
        #[arg(long)]
        owner: String,
    },

    /// List documents for an owner.
    ///
    /// The owner `all` lists every tenant's documents.
    List {
        /// Owner (tenant) to list, or `all`.
        #[arg(long)]
        owner: String,

        /// Maximum number of documents to show.
        #[arg(long, default_value_t = 50)]
        limit: i64,

        /// Number of documents to skip.
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Start the HTTP server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Server subcommands.
#[derive(Subcommand)]
enum ServeService {
    /// Start the JSON HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind` and serves
    /// the ingest, search, and document endpoints.
    Http,
}

async fn build_state(cfg: &Config) -> anyhow::Result<AppState> {
    let pool = db::connect(&cfg.db).await?;
    let store = Arc::new(FsObjectStore::new(cfg.storage.root.clone()));
    let embedder = Arc::new(HttpEmbedder::new(&cfg.embedding)?);
    let parser = Arc::new(FormatParser::new(Capabilities::probe()));

    let pipeline = Arc::new(IngestionPipeline::new(
        pool.clone(),
        store,
        embedder.clone(),
        parser,
        cfg.chunking.clone(),
    ));
    let engine = Arc::new(HybridSearchEngine::new(
        pool.clone(),
        embedder,
        cfg.retrieval.clone(),
    ));

    Ok(AppState {
        pool,
        pipeline,
        engine,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            owner,
            doc_id,
            content_type,
        } => {
            let state = build_state(&cfg).await?;
            let bytes = std::fs::read(&path)?;
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("upload")
                .to_string();
            let content_type = content_type.unwrap_or_else(|| {
                guess_content_type(&filename).to_string()
            });
            let doc_id = doc_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            let outcome = state
                .pipeline
                .ingest(IngestRequest {
                    doc_id,
                    owner,
                    filename,
                    content_type,
                    bytes,
                })
                .await;

            match outcome.status {
                DocumentStatus::Ready => {
                    println!(
                        "Ingested {} as {} ({} chunks).",
                        outcome.filename, outcome.doc_id, outcome.chunks
                    );
                }
                _ => {
                    println!(
                        "Ingestion of {} failed: {}",
                        outcome.filename,
                        outcome.error_message.as_deref().unwrap_or("unknown error")
                    );
                    std::process::exit(1);
                }
            }
        }
        Commands::Search {
            query,
            owner,
            top_k,
            doc_ids,
        } => {
            let state = build_state(&cfg).await?;
            let filters = SearchFilters {
                doc_ids: if doc_ids.is_empty() {
                    None
                } else {
                    Some(doc_ids)
                },
            };
            let hits = state.engine.search(&query, &owner, top_k, &filters).await?;

            if hits.is_empty() {
                println!("No results.");
            } else {
                println!("{} results:", hits.len());
                for (i, hit) in hits.iter().enumerate() {
                    let snippet: String = hit.text.chars().take(120).collect();
                    println!(
                        "{:2}. [{:.4}] {} ({})\n    {}",
                        i + 1,
                        hit.score,
                        hit.source(),
                        hit.doc_id,
                        snippet.replace('\n', " ")
                    );
                }
            }
        }
        Commands::Status { doc_id, owner } => {
            let state = build_state(&cfg).await?;
            match docs::document_status(&state.pool, &doc_id, &owner).await? {
                Some(summary) => {
                    println!("{}  {}", summary.doc_id, summary.filename);
                    println!("  status:   {} ({}%)", summary.status, summary.progress);
                    println!("  chunks:   {}", summary.chunks);
                    if let Some(err) = &summary.error_message {
                        println!("  error:    {}", err);
                    }
                }
                None => {
                    println!("Document {} not found for owner {}.", doc_id, owner);
                    std::process::exit(1);
                }
            }
        }
        Commands::List {
            owner,
            limit,
            offset,
        } => {
            let state = build_state(&cfg).await?;
            let list = docs::list_documents(&state.pool, &owner, limit, offset).await?;
            println!("{} documents ({} shown):", list.total, list.documents.len());
            for doc in &list.documents {
                println!(
                    "  {}  [{}] {} — {} chunks (owner: {})",
                    doc.doc_id, doc.status, doc.filename, doc.chunks, doc.owner
                );
            }
        }
        Commands::Serve { service } => match service {
            ServeService::Http => {
                let state = build_state(&cfg).await?;
                server::run_server(&cfg, state).await?;
            }
        },
    }

    Ok(())
}

/// Best-effort content type from the filename, for the CLI path where no
/// type is declared. The parser falls back to extension detection anyway.
fn guess_content_type(filename: &str) -> &'static str {
    match Format::detect("", filename) {
        Some(Format::Pdf) => "application/pdf",
        Some(Format::Docx) => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some(Format::Xlsx) => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some(Format::Pptx) => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        Some(Format::Markdown) => "text/markdown",
        Some(Format::Csv) => "text/csv",
        Some(Format::Json) => "application/json",
        Some(Format::Html) => "text/html",
        Some(Format::Rtf) => "application/rtf",
        Some(Format::Image) => "application/octet-stream",
        _ => "text/plain",
    }
}
