//! Coderag CLI.
//!
//! Thin shell over the search service: flag parsing, wiring and result
//! printing. All core behavior lives in the library.

use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;

use coderag::Config;
use coderag::RebuildMode;
use coderag::SearchService;
use coderag::types::SearchRequest;

#[derive(Parser)]
#[command(name = "coderag")]
#[command(about = "Incremental code index with AST-aware chunking and hybrid search")]
struct Cli {
    /// Repository root to index and search
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Per-file size cap in bytes
    #[arg(long = "max-size")]
    max_size: Option<u64>,

    /// Do not start indexing on startup
    #[arg(long = "no-auto-index")]
    no_auto_index: bool,

    /// Override the data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one indexing pass and exit
    Index {
        /// Drop all existing index data first
        #[arg(long)]
        clean: bool,
    },

    /// Search the index
    Search {
        /// Search query
        query: String,
        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: i32,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show index status and statistics
    Status,

    /// Index, then watch for changes until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coderag=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.root.canonicalize().unwrap_or(cli.root.clone());

    let mut config = Config::load(&root)?;
    if let Some(max_size) = cli.max_size {
        config.indexing.max_file_size = max_size;
    }
    if cli.no_auto_index {
        config.auto_index = false;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = Some(data_dir);
    }

    match cli.command {
        Some(Command::Index { clean }) => {
            config.auto_index = false;
            config.indexing.watch_enabled = false;
            let service = SearchService::start(config).await?;
            let mode = if clean {
                RebuildMode::Clean
            } else {
                RebuildMode::Incremental
            };
            let outcome = service.reindex(mode).await?;
            println!(
                "indexed: {} added, {} changed, {} deleted, {} failed ({} chunks)",
                outcome.added,
                outcome.changed,
                outcome.deleted,
                outcome.failed,
                outcome.chunks_written
            );
        }

        Some(Command::Search { query, limit, json }) => {
            config.auto_index = false;
            config.indexing.watch_enabled = false;
            let service = SearchService::start(config).await?;

            let mut request = SearchRequest::new(query);
            request.limit = limit;
            let response = service.search(request).await?;

            if !response.index_ready {
                println!("index not ready: run `coderag index` first");
                return Ok(());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&response.hits)?);
            } else {
                for hit in &response.hits {
                    println!(
                        "{}:{}-{}  {:.3}  [{}] {}",
                        hit.path,
                        hit.start_line,
                        hit.end_line,
                        hit.score,
                        hit.chunk_type,
                        match &hit.matched_terms {
                            Some(terms) => terms.join(", "),
                            None => String::new(),
                        }
                    );
                    if let Some(snippet) = &hit.snippet {
                        println!("{snippet}\n");
                    }
                }
                if response.hits.is_empty() {
                    println!("no results");
                }
            }
        }

        Some(Command::Status) => {
            config.auto_index = false;
            config.indexing.watch_enabled = false;
            let service = SearchService::start(config).await?;
            let stats = service.stats().await?;
            println!("{}", service.status_report());
            println!(
                "store: {} files, {} chunks, {} terms",
                stats.file_count, stats.chunk_count, stats.term_count
            );
        }

        Some(Command::Watch) | None => {
            config.indexing.watch_enabled = true;
            let service = SearchService::start(config).await?;
            tracing::info!("watching for changes, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            service.shutdown();
        }
    }

    Ok(())
}
