//! # docdex CLI
//!
//! The `docdex` binary drives the whole pipeline: database initialization,
//! indexing, embedding backfill, queries, and the HTTP tool server.
//!
//! ## Usage
//!
//! ```bash
//! docdex --config ./docdex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docdex init` | Create the SQLite database and run schema migrations |
//! | `docdex index <paths...>` | Chunk files and store them in the index |
//! | `docdex embed` | Backfill embedding vectors for pending chunks |
//! | `docdex search "<query>"` | Ranked semantic search |
//! | `docdex headers <pattern>` | Find chunks by section header |
//! | `docdex context <chunk-id>` | Show a chunk with its neighbors |
//! | `docdex stats` | Index statistics |
//! | `docdex serve mcp` | Start the HTTP tool server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docdex::{config, embedding, ingest, retrieval, server, store};

/// docdex — structure-aware documentation indexing and retrieval for AI tools.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; a missing file falls back to defaults plus environment overrides.
#[derive(Parser)]
#[command(
    name = "docdex",
    about = "docdex — structure-aware documentation indexing and retrieval for AI tools",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./docdex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent;
    /// running it multiple times is safe.
    Init,

    /// Chunk files and store them in the index.
    ///
    /// Accepts files and directories; directories are walked recursively for
    /// `.md`, `.markdown`, and `.txt` files. Re-indexing an unchanged file is
    /// a no-op thanks to content-derived chunk ids.
    Index {
        /// Files or directories to index.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Drop all existing records before indexing.
        #[arg(long)]
        reset: bool,

        /// Show chunk statistics without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Override the chunk size from config (characters).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override the chunk overlap from config (characters).
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Override the embedding batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Backfill embedding vectors for chunks that do not have one yet.
    ///
    /// Requires an enabled embedding provider. Useful after indexing with
    /// the provider disabled, or after a partial indexing failure.
    Embed {
        /// Override the batch size from config (texts per provider call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show the pending count without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Ranked semantic search over indexed chunks.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        max_results: Option<usize>,

        /// Minimum cosine similarity score (-1.0 to 1.0).
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Find chunks whose section headers match a pattern.
    ///
    /// Case-insensitive substring match against every header in each chunk's
    /// lineage. Needs no embedding provider.
    Headers {
        /// Substring to match against header titles.
        pattern: String,

        /// Maximum number of results to return.
        #[arg(long)]
        max_results: Option<usize>,
    },

    /// Show a chunk together with its neighbors from the same document.
    Context {
        /// Chunk id from a previous search result.
        chunk_id: String,

        /// Neighbors to include on each side.
        #[arg(long)]
        size: Option<usize>,
    },

    /// Print index statistics.
    Stats,

    /// Start the HTTP tool server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Server subcommands.
#[derive(Subcommand)]
enum ServeService {
    /// Start the tool server for MCP-style agent integrations.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// tool endpoints.
    Mcp,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let store = store::IndexStore::open(&cfg.db.path).await?;

    match cli.command {
        Commands::Init => {
            println!("Database initialized at {}.", cfg.db.path.display());
        }
        Commands::Index {
            paths,
            reset,
            dry_run,
            chunk_size,
            chunk_overlap,
            batch_size,
        } => {
            let provider = embedding::create_provider(&cfg.embedding)?;
            let opts = ingest::IndexOptions {
                reset,
                dry_run,
                chunk_size,
                chunk_overlap,
                batch_size,
            };
            ingest::run_index(&cfg, &store, provider.as_ref(), &paths, &opts).await?;
        }
        Commands::Embed {
            batch_size,
            dry_run,
        } => {
            let provider = embedding::create_provider(&cfg.embedding)?;
            ingest::run_embed_pending(&cfg, &store, provider.as_ref(), batch_size, dry_run).await?;
        }
        Commands::Search {
            query,
            max_results,
            threshold,
        } => {
            let provider = embedding::create_provider(&cfg.embedding)?;
            let engine = retrieval::RetrievalEngine::new(&store, provider.as_ref(), &cfg);
            let k = max_results.unwrap_or(cfg.retrieval.max_results);
            let threshold = threshold.unwrap_or(cfg.retrieval.score_threshold);
            let hits = engine.search(&query, k, Some(threshold)).await?;

            if hits.is_empty() {
                println!("No results above threshold {}.", threshold);
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {} ({})",
                    i + 1,
                    hit.score,
                    hit.chunk.header_trail(),
                    hit.chunk.document_id
                );
                println!("   id: {}", hit.chunk.id);
                println!("   {}", snippet(&hit.chunk.text, 200));
            }
        }
        Commands::Headers {
            pattern,
            max_results,
        } => {
            let provider = embedding::create_provider(&cfg.embedding)?;
            let engine = retrieval::RetrievalEngine::new(&store, provider.as_ref(), &cfg);
            let limit = max_results.unwrap_or(cfg.retrieval.max_results);
            let hits = engine.search_by_headers(&pattern, limit).await?;

            if hits.is_empty() {
                println!("No chunks match header pattern '{}'.", pattern);
            }
            for chunk in &hits {
                println!(
                    "[{}] {} ({})",
                    chunk.sequence_index,
                    chunk.header_trail(),
                    chunk.document_id
                );
                println!("   id: {}", chunk.id);
                println!("   {}", snippet(&chunk.text, 200));
            }
        }
        Commands::Context { chunk_id, size } => {
            let provider = embedding::create_provider(&cfg.embedding)?;
            let engine = retrieval::RetrievalEngine::new(&store, provider.as_ref(), &cfg);
            let size = size.unwrap_or(cfg.retrieval.context_size);
            let window = engine.get_context(&chunk_id, size).await?;

            for chunk in &window.before {
                println!("--- [{}] ---", chunk.sequence_index);
                println!("{}", chunk.text);
            }
            println!("=== [{}] (target) ===", window.target.sequence_index);
            println!("{}", window.target.text);
            for chunk in &window.after {
                println!("--- [{}] ---", chunk.sequence_index);
                println!("{}", chunk.text);
            }
        }
        Commands::Stats => {
            let provider = embedding::create_provider(&cfg.embedding)?;
            let engine = retrieval::RetrievalEngine::new(&store, provider.as_ref(), &cfg);
            let stats = engine.get_stats().await?;
            println!("Chunks:     {}", stats.total_chunks);
            println!("Documents:  {}", stats.total_documents);
            println!("Model:      {}", stats.model);
            println!("Dimension:  {}", stats.dimension);
        }
        Commands::Serve { service } => match service {
            ServeService::Mcp => {
                let provider = embedding::create_provider(&cfg.embedding)?;
                server::serve(cfg, store, provider).await?;
            }
        },
    }

    Ok(())
}

/// First `max` characters of a chunk on one line, for list output.
fn snippet(text: &str, max: usize) -> String {
    let one_line = text.replace('\n', " ");
    let mut out: String = one_line.chars().take(max).collect();
    if one_line.chars().count() > max {
        out.push('…');
    }
    out
}
