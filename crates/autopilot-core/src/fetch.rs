//! Getting a repository onto disk for indexing.

use std::path::Path;

use async_trait::async_trait;

/// Materializes `repo_url` into the (existing, empty) directory `dest`.
#[async_trait]
pub trait RepoFetcher: Send + Sync {
    async fn fetch(&self, repo_url: &str, dest: &Path) -> Result<(), FetchError>;
}

/// Shallow clone with the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    depth: Option<u32>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self { depth: Some(1) }
    }
}

impl GitCli {
    /// Full history instead of a shallow clone.
    pub fn full_history() -> Self {
        Self { depth: None }
    }
}

#[async_trait]
impl RepoFetcher for GitCli {
    async fn fetch(&self, repo_url: &str, dest: &Path) -> Result<(), FetchError> {
        let mut cmd = tokio::process::Command::new("git");
        cmd.arg("clone").arg("--quiet");
        if let Some(depth) = self.depth {
            cmd.arg("--depth").arg(depth.to_string());
        }
        let output = cmd
            .arg("--")
            .arg(repo_url)
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(FetchError::Spawn)?;
        if !output.status.success() {
            return Err(FetchError::Clone {
                repo_url: repo_url.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to run git: {0}")]
    Spawn(std::io::Error),
    #[error("git clone of {repo_url} failed: {stderr}")]
    Clone { repo_url: String, stderr: String },
}
