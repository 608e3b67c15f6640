//! Project identity: one record per repository URL.
//!
//! The id is derived from the normalized URL, so indexing the same repository
//! twice always lands on the same project.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub repo_url: String,
    /// Repository name, e.g. `autopilot`.
    pub name: String,
    /// Owner and name, e.g. `acme/autopilot`.
    pub full_name: String,
}

impl Project {
    /// Derives id, name and full name from a clone URL.
    ///
    /// Accepts `https://host/owner/repo(.git)`, `ssh://…`, scp-like
    /// `git@host:owner/repo.git` and plain paths.
    pub fn from_repo_url(repo_url: &str) -> Result<Self, ProjectError> {
        let trimmed = repo_url.trim();
        let path = repo_path(trimmed).ok_or_else(|| ProjectError::InvalidUrl(repo_url.to_string()))?;
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let name = segments
            .pop()
            .map(|s| s.strip_suffix(".git").unwrap_or(s))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProjectError::InvalidUrl(repo_url.to_string()))?
            .to_string();
        let full_name = match segments.pop() {
            Some(owner) => format!("{owner}/{name}"),
            None => name.clone(),
        };
        Ok(Self {
            id: project_id(trimmed),
            repo_url: trimmed.to_string(),
            name,
            full_name,
        })
    }
}

/// The path part of a repository URL.
fn repo_path(repo_url: &str) -> Option<String> {
    if repo_url.is_empty() {
        return None;
    }
    if let Ok(url) = url::Url::parse(repo_url) {
        if url.scheme() == "file" || url.has_host() {
            return Some(url.path().to_string());
        }
    }
    // scp-like syntax: user@host:owner/repo.git
    if let Some((head, rest)) = repo_url.split_once(':') {
        if head.contains('@') && !rest.starts_with('/') {
            return Some(rest.to_string());
        }
    }
    Some(repo_url.replace('\\', "/"))
}

/// Deterministic id: first 16 bytes of SHA-256 over the normalized URL, hex.
pub fn project_id(repo_url: &str) -> ProjectId {
    let digest = Sha256::digest(normalize_url(repo_url).as_bytes());
    let hex: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
    ProjectId(hex)
}

/// Case, trailing slashes and a `.git` suffix do not make a different repository.
fn normalize_url(repo_url: &str) -> String {
    let lower = repo_url.trim().to_lowercase();
    let no_slash = lower.trim_end_matches('/');
    no_slash.strip_suffix(".git").unwrap_or(no_slash).to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("cannot derive a project from repository URL '{0}'")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_url() {
        let p = Project::from_repo_url("https://github.com/acme/widgets.git").unwrap();
        assert_eq!(p.name, "widgets");
        assert_eq!(p.full_name, "acme/widgets");
        assert_eq!(p.id.0.len(), 32);
    }

    #[test]
    fn scp_like_url() {
        let p = Project::from_repo_url("git@github.com:acme/widgets.git").unwrap();
        assert_eq!(p.full_name, "acme/widgets");
    }

    #[test]
    fn local_path() {
        let p = Project::from_repo_url("/srv/repos/widgets/").unwrap();
        assert_eq!(p.name, "widgets");
        assert_eq!(p.full_name, "repos/widgets");
    }

    #[test]
    fn equivalent_urls_share_an_id() {
        let a = project_id("https://github.com/Acme/Widgets.git");
        let b = project_id("https://github.com/acme/widgets/");
        assert_eq!(a, b);
        assert_ne!(a, project_id("https://github.com/acme/gadgets"));
    }

    #[test]
    fn empty_url_is_rejected() {
        assert!(Project::from_repo_url("  ").is_err());
        assert!(Project::from_repo_url("https://github.com/").is_err());
    }
}
