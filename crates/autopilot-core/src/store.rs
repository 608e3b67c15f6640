//! Vector store for chunk embeddings: projects, records and similarity search.
//!
//! [`EmbeddingStore`] is the persistence seam the indexer writes through.
//! [`VectorStore`] keeps everything in memory and, when opened with a path,
//! rewrites a JSON snapshot after every change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::chunks::{Chunk, SymbolType};
use crate::project::{Project, ProjectId};

/// One stored vector with the metadata of the chunk it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub project_id: ProjectId,
    pub content: String,
    pub embedding: Vec<f32>,
    pub file_path: String,
    pub symbol_type: SymbolType,
    pub symbol_name: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
}

impl EmbeddingRecord {
    pub fn new(project_id: ProjectId, chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self {
            project_id,
            content: chunk.text,
            embedding,
            file_path: chunk.file_path,
            symbol_type: chunk.symbol_type,
            symbol_name: chunk.symbol_name,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
        }
    }
}

/// Outcome of [`EmbeddingStore::resolve_or_create_project`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectResolution {
    Created(Project),
    /// The repository was indexed before; its old records must be cleared.
    Existing(Project),
}

impl ProjectResolution {
    pub fn project(&self) -> &Project {
        match self {
            Self::Created(p) | Self::Existing(p) => p,
        }
    }

    pub fn into_project(self) -> Project {
        match self {
            Self::Created(p) | Self::Existing(p) => p,
        }
    }
}

/// A record with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: EmbeddingRecord,
    pub similarity: f32,
}

#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// The stored project with `project.id`, or else one with the same `full_name`.
    async fn find_project(&self, project: &Project) -> Result<Option<Project>, StoreError>;

    /// Returns the project for `project.id`, or for a project with the same
    /// `full_name`, creating it when neither exists.
    async fn resolve_or_create_project(&self, project: &Project) -> Result<ProjectResolution, StoreError>;

    /// Removes every record of a project. Returns how many were removed.
    async fn delete_project_embeddings(&self, project_id: &ProjectId) -> Result<usize, StoreError>;

    /// Inserts records. Returns how many were inserted.
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize, StoreError>;

    /// Number of records stored for a project.
    async fn count(&self, project_id: &ProjectId) -> Result<usize, StoreError>;

    /// Up to `limit` records with similarity ≥ `threshold`, best first.
    /// `None` searches every project.
    async fn search(
        &self,
        query: &[f32],
        project_id: Option<&ProjectId>,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read store {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write store {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("corrupt store {0}: {1}")]
    Corrupt(PathBuf, serde_json::Error),
    #[error("failed to serialize store: {0}")]
    Serialize(serde_json::Error),
    #[error("unknown project {0}")]
    UnknownProject(ProjectId),
    #[error("record for {file_path} has an empty embedding")]
    EmptyEmbedding { file_path: String },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    projects: BTreeMap<ProjectId, Project>,
    records: Vec<EmbeddingRecord>,
}

/// In-memory store with optional JSON persistence.
#[derive(Debug, Default)]
pub struct VectorStore {
    data: RwLock<StoreData>,
    path: Option<PathBuf>,
}

impl VectorStore {
    /// Store that lives only as long as the process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens (or starts) a store persisted at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s).map_err(|e| StoreError::Corrupt(path.clone(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(StoreError::Read(path, e)),
        };
        Ok(Self {
            data: RwLock::new(data),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn projects(&self) -> Vec<Project> {
        self.data.read().await.projects.values().cloned().collect()
    }

    async fn persist(&self, data: &StoreData) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let s = serde_json::to_string(data).map_err(StoreError::Serialize)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Write(path.clone(), e))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, s)
            .await
            .map_err(|e| StoreError::Write(tmp.clone(), e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::Write(path.clone(), e))
    }
}

#[async_trait]
impl EmbeddingStore for VectorStore {
    async fn find_project(&self, project: &Project) -> Result<Option<Project>, StoreError> {
        let data = self.data.read().await;
        Ok(lookup(&data, project))
    }

    async fn resolve_or_create_project(&self, project: &Project) -> Result<ProjectResolution, StoreError> {
        let mut data = self.data.write().await;
        if let Some(existing) = lookup(&data, project) {
            return Ok(ProjectResolution::Existing(existing));
        }
        data.projects.insert(project.id.clone(), project.clone());
        if let Err(e) = self.persist(&data).await {
            data.projects.remove(&project.id);
            return Err(e);
        }
        Ok(ProjectResolution::Created(project.clone()))
    }

    async fn delete_project_embeddings(&self, project_id: &ProjectId) -> Result<usize, StoreError> {
        let mut data = self.data.write().await;
        let removed = data.records.iter().filter(|r| &r.project_id == project_id).count();
        if removed == 0 {
            return Ok(0);
        }
        let previous = std::mem::take(&mut data.records);
        data.records = previous
            .iter()
            .filter(|r| &r.project_id != project_id)
            .cloned()
            .collect();
        if let Err(e) = self.persist(&data).await {
            data.records = previous;
            return Err(e);
        }
        Ok(removed)
    }

    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize, StoreError> {
        let mut data = self.data.write().await;
        for record in &records {
            if !data.projects.contains_key(&record.project_id) {
                return Err(StoreError::UnknownProject(record.project_id.clone()));
            }
            if record.embedding.is_empty() {
                return Err(StoreError::EmptyEmbedding {
                    file_path: record.file_path.clone(),
                });
            }
        }
        let before = data.records.len();
        data.records.extend(records);
        if let Err(e) = self.persist(&data).await {
            data.records.truncate(before);
            return Err(e);
        }
        Ok(data.records.len() - before)
    }

    async fn count(&self, project_id: &ProjectId) -> Result<usize, StoreError> {
        let data = self.data.read().await;
        Ok(data.records.iter().filter(|r| &r.project_id == project_id).count())
    }

    async fn search(
        &self,
        query: &[f32],
        project_id: Option<&ProjectId>,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let data = self.data.read().await;
        if data.records.is_empty() || query.is_empty() {
            return Ok(Vec::new());
        }
        let q_norm = normalize(query);
        let mut scored: Vec<SearchHit> = data
            .records
            .iter()
            .filter(|r| project_id.map_or(true, |id| &r.project_id == id))
            .map(|r| SearchHit {
                similarity: dot(&q_norm, &normalize(&r.embedding)),
                record: r.clone(),
            })
            .filter(|hit| hit.similarity >= threshold)
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

fn lookup(data: &StoreData, project: &Project) -> Option<Project> {
    data.projects.get(&project.id).cloned().or_else(|| {
        data.projects
            .values()
            .find(|p| p.full_name == project.full_name)
            .cloned()
    })
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    (0..n).map(|i| a[i] * b[i]).sum()
}
