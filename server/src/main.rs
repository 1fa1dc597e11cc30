//! `codesearch` binary — thin CLI shell over the [`codesearch_core`] engine.
//! Two subcommands: `index` a project, `search` an already-indexed one.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use codesearch_core::{self as engine, Config, NoopCallbacks, SearchMode};

#[derive(Parser)]
#[command(name = "codesearch", version, about = "Per-project code search engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file overriding engine defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Index (or re-index) a project directory.
    Index {
        /// Project root to index.
        path: PathBuf,
    },
    /// Search an already-indexed project.
    Search {
        /// Project root that was previously indexed.
        path: PathBuf,
        /// Query text.
        query: String,
        /// Search mode: vector, keyword, or hybrid.
        #[arg(long, default_value = "hybrid")]
        mode: String,
        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Equality filter over an indexed string column, `key=value`. May be
        /// given more than once; filters are ANDed together.
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => match Config::load_from(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("failed to load config from {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    match cli.command {
        Commands::Index { path } => run_index(&path, &config).await,
        Commands::Search { path, query, mode, limit, filters } => {
            run_search(&path, &query, &mode, limit, &config, &filters).await
        }
    }
}

async fn run_index(path: &std::path::Path, config: &Config) -> ExitCode {
    match engine::index(path, config, &NoopCallbacks).await {
        Ok(result) if result.success => {
            println!(
                "indexed {} files ({} chunks) into {}",
                result.indexed_files_count, result.total_chunks, result.database_location
            );
            if result.failed_files_count > 0 {
                println!("{} files failed:", result.failed_files_count);
                for f in &result.failed_files {
                    println!("  {} ({}): {}", f.file, f.error_type, f.message);
                }
            }
            ExitCode::SUCCESS
        }
        Ok(result) => {
            eprintln!("indexing did not complete: {}", result.error.unwrap_or_default());
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("indexing failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_search(
    path: &std::path::Path,
    query: &str,
    mode: &str,
    limit: usize,
    config: &Config,
    filters: &[(String, String)],
) -> ExitCode {
    let mode: SearchMode = match mode.parse() {
        Ok(m) => m,
        Err(other) => {
            eprintln!("unknown search mode: {other} (expected vector, keyword, or hybrid)");
            return ExitCode::FAILURE;
        }
    };

    match engine::search(path, query, mode, limit, config, filters).await {
        Ok(rows) => {
            if rows.is_empty() {
                println!("no results");
            }
            for row in &rows {
                let preview: String = row.content.chars().take(config.preview_length).collect();
                println!("{}:{}-{} [{}]", row.file_path, row.start_line, row.end_line, row.node_name);
                println!("  {}", preview.replace('\n', " "));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("search failed: {e}");
            ExitCode::FAILURE
        }
    }
}
