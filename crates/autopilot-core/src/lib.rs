//! All indexing logic independent of how it is run (CLI or the webhook service).
//!
//! Repositories are cloned into scratch directories that are removed after
//! every run. Only config and the local vector index live in the app data
//! directory (see [app_data]).

pub mod app_data;
pub mod batch;
pub mod chunks;
pub mod config;
pub mod embed;
pub mod fetch;
pub mod files;
pub mod index;
pub mod ollama;
pub mod openai;
pub mod project;
pub mod splitter;
pub mod store;
pub mod tokens;

pub use app_data::app_data_dir;
pub use batch::{Batch, Batcher};
pub use chunks::{Chunk, Chunker, Language, SymbolType};
pub use config::{load_config, save_config, ChunkingConfig, Config, ConfigError};
pub use embed::{EmbedError, Embedder};
pub use fetch::{FetchError, GitCli, RepoFetcher};
pub use files::{FileSelector, SelectedFile, SkipReason};
pub use index::{IndexError, IndexReport, IndexState, RepoIndexer};
pub use ollama::OllamaClient;
pub use openai::OpenAiEmbedder;
pub use project::{Project, ProjectId};
pub use splitter::ChunkSplitter;
pub use store::{EmbeddingRecord, EmbeddingStore, ProjectResolution, SearchHit, StoreError, VectorStore};
pub use tokens::TokenCounter;

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "autopilot-core ready"
}
