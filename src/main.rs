use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use semdex::config::load_config;
use semdex::embeddings::OpenAiEmbeddings;
use semdex::indexer::IndexPipeline;
use semdex::server::run_stdio_server;
use semdex::store::VectorStore;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "semdex")]
#[command(version)]
#[command(about = "Merkle-backed incremental semantic code index (Pure Rust MCP server)")]
struct Cli {
    /// Project root to operate on (defaults to the current directory).
    #[arg(long, global = true, value_name = "PATH")]
    project: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start MCP stdio server
    Mcp,
    /// Run one indexing pass now (incremental unless --full)
    Index {
        /// Reprocess every file instead of only the changed ones
        #[arg(long)]
        full: bool,
    },
    /// Print index metadata and current file hashes as JSON
    Status,
    /// Embed TEXT and print the nearest indexed blocks as JSON
    Query {
        text: String,
        /// Number of results to return
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("semdex=info".parse().unwrap()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let project = match cli.project {
        Some(p) => p,
        None => std::env::current_dir().context("Failed to get current dir")?,
    };

    let cfg = load_config(&project);
    let store = VectorStore::new(cfg.store_dir());
    let embedder = Arc::new(OpenAiEmbeddings::new(&cfg.embedding));
    let pipeline = Arc::new(IndexPipeline::new(cfg, store, embedder));

    match cli.cmd {
        Command::Mcp => run_stdio_server(pipeline),
        Command::Index { full } => {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap()
                    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
            spinner.enable_steady_tick(std::time::Duration::from_millis(80));
            spinner.set_message(if full { "running full index..." } else { "running incremental index..." });

            let summary = if full {
                pipeline.full_index(&project)?
            } else {
                pipeline.incremental_index(&project)?
            };

            spinner.finish_with_message(format!(
                "indexed {} files ({} blocks, {} chunks skipped, {} files deleted)",
                summary.files_processed,
                summary.blocks_indexed,
                summary.chunks_skipped,
                summary.files_deleted
            ));
            Ok(())
        }
        Command::Status => {
            let status = pipeline.status(&project)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Query { text, top_k } => {
            let result = pipeline.query(&project, &text, top_k)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
