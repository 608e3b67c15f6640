//! Index pipeline: resolve project → clone → select files → chunk → batch → embed → store.
//!
//! A run walks `ProjectResolved → Cloned → Chunked → EmbeddedAndStored → Done`
//! and can fail from any state. The scratch clone is removed on every exit
//! path. A batch that fails to embed or store is counted and skipped; the run
//! carries on with the next one.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batch::{Batch, Batcher};
use crate::chunks::{Chunk, Chunker};
use crate::config::{ChunkingConfig, ConfigError, TimeoutConfig};
use crate::embed::{EmbedError, Embedder};
use crate::fetch::{FetchError, RepoFetcher};
use crate::files::FileSelector;
use crate::project::{Project, ProjectError, ProjectId};
use crate::store::{EmbeddingRecord, EmbeddingStore, ProjectResolution, SearchHit, StoreError};
use crate::tokens::TokenCounter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    ProjectResolved,
    Cloned,
    Chunked,
    EmbeddedAndStored,
    Done,
    Failed,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ProjectResolved => "project_resolved",
            Self::Cloned => "cloned",
            Self::Chunked => "chunked",
            Self::EmbeddedAndStored => "embedded_and_stored",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What one run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub project_id: ProjectId,
    pub state: IndexState,
    /// Files that passed the selector.
    pub files: usize,
    /// Chunks produced by the chunker and splitter.
    pub chunks: usize,
    /// Chunks the batcher refused (blank or over the ceiling).
    pub dropped: usize,
    pub batches: usize,
    pub failed_batches: usize,
    /// Records written to the store.
    pub inserted: usize,
    /// Chunks lost to failed batches.
    pub failed: usize,
}

impl IndexReport {
    fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            state: IndexState::ProjectResolved,
            files: 0,
            chunks: 0,
            dropped: 0,
            batches: 0,
            failed_batches: 0,
            inserted: 0,
            failed: 0,
        }
    }
}

/// Indexes repositories into an [`EmbeddingStore`]. Holds no per-run state,
/// so one instance can serve many runs (one at a time per repository).
pub struct RepoIndexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn EmbeddingStore>,
    fetcher: Arc<dyn RepoFetcher>,
    config: ChunkingConfig,
    selector: FileSelector,
    chunker: Chunker,
    batcher: Batcher,
    timeouts: TimeoutConfig,
    cancel: CancellationToken,
}

impl RepoIndexer {
    /// Validates `config` and loads the tokenizer for the embedder's model.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn EmbeddingStore>,
        fetcher: Arc<dyn RepoFetcher>,
        config: ChunkingConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let counter = TokenCounter::for_model(embedder.model());
        Ok(Self {
            selector: FileSelector::new(config.max_file_bytes),
            chunker: Chunker::new(counter.clone(), &config),
            batcher: Batcher::new(counter, &config),
            embedder,
            store,
            fetcher,
            config,
            timeouts: TimeoutConfig::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Replaces the tokenizer used for chunking and batching.
    pub fn with_token_counter(mut self, counter: TokenCounter) -> Self {
        self.chunker = Chunker::new(counter.clone(), &self.config);
        self.batcher = Batcher::new(counter, &self.config);
        self
    }

    /// Cancel this token to stop runs at the next batch boundary.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Entry point for the webhook layer: true when the run reached `Done`.
    /// Partial batch failures still count as done; see the logged report.
    pub async fn index_repo(&self, repo_url: &str) -> bool {
        match self.run(repo_url).await {
            Ok(report) => {
                info!(
                    "indexed {repo_url}: {} inserted, {} failed, {} dropped",
                    report.inserted, report.failed, report.dropped
                );
                true
            }
            Err(e) => {
                warn!("indexing {repo_url} failed: {e}");
                false
            }
        }
    }

    /// Full run with a fresh scratch clone.
    pub async fn run(&self, repo_url: &str) -> Result<IndexReport, IndexError> {
        let project = self.resolve_project(repo_url).await?;
        let scratch = tempfile::Builder::new()
            .prefix("autopilot-clone-")
            .tempdir()
            .map_err(IndexError::Scratch)?;
        // A project matched by full_name keeps its stored URL; clone what was asked for.
        let result = self.clone_and_index(&project, repo_url.trim(), scratch.path()).await;
        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!("failed to remove {}: {e}", scratch_path.display());
        }
        if let Err(e) = &result {
            enter(&project.id, IndexState::Failed);
            warn!("run for {} stopped: {e}", project.full_name);
        }
        result
    }

    /// Resolves or creates the project for `repo_url`. A project that already
    /// exists has its previous records cleared, so every run starts from zero.
    pub async fn resolve_project(&self, repo_url: &str) -> Result<Project, IndexError> {
        let candidate = Project::from_repo_url(repo_url)?;
        let resolution = timed(
            self.timeouts.store_timeout(),
            "resolve project",
            self.store.resolve_or_create_project(&candidate),
        )
        .await?;
        let project = match resolution {
            ProjectResolution::Created(project) => {
                info!("created project {} ({})", project.full_name, project.id);
                project
            }
            ProjectResolution::Existing(project) => {
                let removed = timed(
                    self.timeouts.store_timeout(),
                    "clear embeddings",
                    self.store.delete_project_embeddings(&project.id),
                )
                .await?;
                info!(
                    "re-indexing {} ({}): cleared {removed} records",
                    project.full_name, project.id
                );
                project
            }
        };
        enter(&project.id, IndexState::ProjectResolved);
        Ok(project)
    }

    async fn clone_and_index(
        &self,
        project: &Project,
        repo_url: &str,
        dest: &Path,
    ) -> Result<IndexReport, IndexError> {
        self.check_cancelled()?;
        timed(self.timeouts.clone_timeout(), "clone", self.fetcher.fetch(repo_url, dest))
        .await?;
        enter(&project.id, IndexState::Cloned);
        self.index_tree(project, dest).await
    }

    /// The stored project `repo_url` resolves to, without creating one.
    pub async fn find_project(&self, repo_url: &str) -> Result<Option<Project>, IndexError> {
        let candidate = Project::from_repo_url(repo_url)?;
        let found = timed(
            self.timeouts.store_timeout(),
            "find project",
            self.store.find_project(&candidate),
        )
        .await?;
        Ok(found)
    }

    /// Chunks, embeds and stores everything under `root` for an already
    /// resolved project.
    pub async fn index_tree(&self, project: &Project, root: &Path) -> Result<IndexReport, IndexError> {
        let (files, chunks) = self.chunk_tree(root).await?;
        enter(&project.id, IndexState::Chunked);
        info!("{}: {} chunks from {files} files", project.full_name, chunks.len());

        let mut report = IndexReport::new(project.id.clone());
        report.files = files;
        report.chunks = chunks.len();

        let mut batches = self.batcher.batches(chunks);
        for batch in batches.by_ref() {
            self.check_cancelled()?;
            report.batches += 1;
            let size = batch.len();
            match self.store_batch(&project.id, batch).await {
                Ok(inserted) => report.inserted += inserted,
                Err(e) => {
                    warn!("batch {} ({size} chunks) failed: {e}", report.batches);
                    report.failed_batches += 1;
                    report.failed += size;
                }
            }
        }
        report.dropped = batches.dropped();
        enter(&project.id, IndexState::EmbeddedAndStored);

        report.state = IndexState::Done;
        enter(&project.id, IndexState::Done);
        Ok(report)
    }

    /// Selects and chunks every file under `root` on the blocking pool.
    /// Returns the number of files read and their chunks in walk order.
    pub async fn chunk_tree(&self, root: &Path) -> Result<(usize, Vec<Chunk>), IndexError> {
        let selector = self.selector.clone();
        let chunker = self.chunker.clone();
        let root: PathBuf = root.to_path_buf();
        let chunked = tokio::task::spawn_blocking(move || {
            let mut files = 0;
            let mut chunks = Vec::new();
            for file in selector.walk(&root) {
                files += 1;
                chunks.extend(chunker.chunk_file(&file.absolute, &file.relative));
            }
            (files, chunks)
        })
        .await?;
        Ok(chunked)
    }

    async fn store_batch(&self, project_id: &ProjectId, batch: Batch) -> Result<usize, IndexError> {
        let texts = batch.texts();
        let vectors = timed(self.timeouts.embed_timeout(), "embed", self.embedder.embed(&texts)).await?;
        if vectors.len() != batch.len() {
            return Err(EmbedError::Count {
                expected: batch.len(),
                got: vectors.len(),
            }
            .into());
        }
        let records: Vec<EmbeddingRecord> = batch
            .chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingRecord::new(project_id.clone(), chunk, vector))
            .collect();
        timed(self.timeouts.store_timeout(), "store", self.store.upsert(records)).await
    }

    /// Similarity search over stored code; `project_id: None` searches every project.
    pub async fn search_code(
        &self,
        query: &str,
        project_id: Option<&ProjectId>,
        limit: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let texts = [query.to_string()];
        let vectors = timed(self.timeouts.embed_timeout(), "embed query", self.embedder.embed(&texts)).await?;
        let Some(query_vector) = vectors.into_iter().next() else {
            return Err(EmbedError::Count { expected: 1, got: 0 }.into());
        };
        let hits = timed(
            self.timeouts.store_timeout(),
            "search",
            self.store.search(&query_vector, project_id, limit, similarity_threshold),
        )
        .await?;
        Ok(hits)
    }

    fn check_cancelled(&self) -> Result<(), IndexError> {
        if self.cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        Ok(())
    }
}

fn enter(project_id: &ProjectId, state: IndexState) {
    info!(project = %project_id, %state, "index state");
}

async fn timed<T, E, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T, IndexError>
where
    F: Future<Output = Result<T, E>>,
    IndexError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(IndexError::from),
        Err(_) => Err(IndexError::Timeout { operation, limit }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error("clone failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("embedding error: {0}")]
    Embed(#[from] EmbedError),
    #[error("{operation} timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },
    #[error("failed to create scratch directory: {0}")]
    Scratch(std::io::Error),
    #[error("chunking task failed: {0}")]
    Chunking(#[from] tokio::task::JoinError),
    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timed_reports_the_operation() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), StoreError>(())
        };
        let err = timed(Duration::from_millis(10), "store", slow).await.unwrap_err();
        assert!(matches!(err, IndexError::Timeout { operation: "store", .. }));
        assert_eq!(err.to_string(), "store timed out after 10ms");
    }

    #[test]
    fn state_names_are_snake_case() {
        assert_eq!(IndexState::EmbeddedAndStored.to_string(), "embedded_and_stored");
        assert_eq!(
            serde_json::to_string(&IndexState::ProjectResolved).unwrap(),
            "\"project_resolved\""
        );
    }
}
