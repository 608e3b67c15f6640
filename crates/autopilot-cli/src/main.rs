//! CLI entry point for the autopilot indexer (for dev and manual runs).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use autopilot_core::config::{self, Config};
use autopilot_core::{
    app_data_dir, embed, load_config, save_config, status, Chunker, FileSelector, GitCli, RepoIndexer, TokenCounter,
    VectorStore,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "autopilot")]
#[command(about = "Autopilot: index repositories for code search")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend status (for dev).
    Status,
    /// Show where autopilot stores its config and index (app data directory).
    DataDir,
    /// Write the current config, with defaults filled in, to config.toml.
    InitConfig,
    /// List the files of a checkout that would be indexed.
    Scan {
        /// Root of a checked-out repository.
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Chunk a checkout without embedding anything.
    Chunk {
        #[arg(value_name = "PATH")]
        path: PathBuf,
        /// Print every chunk as JSON instead of a summary line each.
        #[arg(long)]
        json: bool,
    },
    /// Clone and index a repository, replacing its previous records.
    Index {
        /// Clone URL; also identifies the project.
        #[arg(value_name = "REPO_URL")]
        repo_url: String,
        /// Index this local checkout instead of cloning.
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,
    },
    /// Search indexed code by similarity.
    Search {
        query: String,
        /// Restrict to the project of this repository URL.
        #[arg(long, value_name = "REPO_URL")]
        project: Option<String>,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        #[arg(long, default_value_t = 0.4)]
        threshold: f32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config();

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            println!("Autopilot indexer");
            println!("  core: {}", status());
            println!("  embedder: {:?}", config.embedder.provider);
            match config::store_path(&config) {
                Some(p) => println!("  store: {}", p.display()),
                None => println!("  store: in memory"),
            }
            ExitCode::SUCCESS
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => {
                println!("{}", p.display());
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("Could not determine app data directory.");
                ExitCode::FAILURE
            }
        },
        Commands::InitConfig => match save_config(&config) {
            Ok(()) => {
                if let Some(dir) = app_data_dir() {
                    println!("Wrote {}", dir.join("config.toml").display());
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        },
        Commands::Scan { path } => {
            let selector = FileSelector::new(config.chunking.max_file_bytes);
            let mut count = 0;
            for file in selector.walk(&path) {
                println!("  {}", file.relative);
                count += 1;
            }
            println!("Selected {count} file(s) under {}", path.display());
            ExitCode::SUCCESS
        }
        Commands::Chunk { path, json } => chunk(&config, &path, json),
        Commands::Index { repo_url, path } => index(&config, &repo_url, path).await,
        Commands::Search {
            query,
            project,
            limit,
            threshold,
        } => search(&config, &query, project.as_deref(), limit, threshold).await,
    }
}

fn chunk(config: &Config, path: &Path, json: bool) -> ExitCode {
    let model = config.embedder.model.as_deref().unwrap_or("text-embedding-ada-002");
    let counter = TokenCounter::for_model(model);
    let chunker = Chunker::new(counter.clone(), &config.chunking);
    let selector = FileSelector::new(config.chunking.max_file_bytes);
    let mut total = 0;
    for file in selector.walk(path) {
        for c in chunker.chunk_file(&file.absolute, &file.relative) {
            total += 1;
            if json {
                match serde_json::to_string(&c) {
                    Ok(line) => println!("{line}"),
                    Err(e) => eprintln!("Error: {e}"),
                }
            } else {
                let name = c.symbol_name.as_deref().unwrap_or("-");
                println!(
                    "  {}:{}-{}  {}  {}  {} tokens",
                    c.file_path,
                    c.start_line,
                    c.end_line,
                    c.symbol_type.as_str(),
                    name,
                    counter.count(&c.text)
                );
            }
        }
    }
    if !json {
        println!("{total} chunk(s) under {}", path.display());
    }
    ExitCode::SUCCESS
}

fn build_indexer(config: &Config) -> Result<RepoIndexer, String> {
    let embedder = embed::from_config(&config.embedder).map_err(|e| e.to_string())?;
    let store = match config::store_path(config) {
        Some(p) => VectorStore::open(p).map_err(|e| e.to_string())?,
        None => VectorStore::new(),
    };
    let indexer = RepoIndexer::new(embedder, Arc::new(store), Arc::new(GitCli::default()), config.chunking.clone())
        .map_err(|e| e.to_string())?
        .with_timeouts(config.timeouts.clone());
    Ok(indexer)
}

async fn index(config: &Config, repo_url: &str, path: Option<PathBuf>) -> ExitCode {
    let indexer = match build_indexer(config) {
        Ok(indexer) => indexer,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = indexer.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current batch");
            cancel.cancel();
        }
    });

    let result = match path {
        Some(root) => match indexer.resolve_project(repo_url).await {
            Ok(project) => indexer.index_tree(&project, &root).await,
            Err(e) => Err(e),
        },
        None => indexer.run(repo_url).await,
    };
    match result {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(s) => println!("{s}"),
                Err(e) => eprintln!("Error: {e}"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn search(config: &Config, query: &str, project: Option<&str>, limit: usize, threshold: f32) -> ExitCode {
    let indexer = match build_indexer(config) {
        Ok(indexer) => indexer,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let project_id = match project {
        Some(url) => match indexer.find_project(url).await {
            Ok(Some(found)) => Some(found.id),
            Ok(None) => {
                eprintln!("No indexed project for {url}.");
                return ExitCode::FAILURE;
            }
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };
    match indexer.search_code(query, project_id.as_ref(), limit, threshold).await {
        Ok(hits) => {
            if hits.is_empty() {
                println!("No matches.");
            }
            for hit in hits {
                let r = &hit.record;
                println!(
                    "{:.3}  {}:{}-{}  {}",
                    hit.similarity,
                    r.file_path,
                    r.start_line,
                    r.end_line,
                    r.symbol_name.as_deref().unwrap_or(r.symbol_type.as_str())
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
