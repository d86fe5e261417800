//! Content fetcher: resolves a repository, lists its tree and fetches raw files.

pub mod github;

use async_trait::async_trait;
use url::Url;

use crate::error::{Result, RepoRagError};

pub use github::GithubClient;

/// `owner/name` as written by the user, before the remote confirms it exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Repository metadata confirmed by the hosting API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    pub owner: String,
    pub name: String,
    pub remote_id: i64,
    pub default_branch: String,
}

impl RemoteRepo {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Tree,
    Other,
}

/// One entry of the recursive file tree listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn blob(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Blob,
        }
    }
}

/// Remote hosting API as seen by the importer.
///
/// `resolve` must report a missing or inaccessible repository as
/// [`RepoRagError::NotFound`], and transport problems as [`RepoRagError::Remote`].
#[async_trait]
pub trait RepoSource: Send + Sync {
    async fn resolve(&self, repo: &RepoRef) -> Result<RemoteRepo>;

    /// Recursive listing of the default branch, in the API's order
    async fn list_tree(&self, repo: &RemoteRepo) -> Result<Vec<TreeEntry>>;

    /// Raw bytes of one file on the default branch
    async fn fetch_file(&self, repo: &RemoteRepo, path: &str) -> Result<Vec<u8>>;
}

/// Parse `https://github.com/owner/name[.git][/]`, the same without a scheme, or the
/// `owner/name` shorthand.
pub fn parse_repo_url(input: &str) -> Result<RepoRef> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(RepoRagError::InvalidInput("Repository URL required".to_string()));
    }

    let segments: Vec<String> = if trimmed.contains("://") {
        let url = Url::parse(trimmed)
            .map_err(|e| RepoRagError::InvalidInput(format!("Invalid repository URL: {}", e)))?;
        match url.host_str() {
            Some("github.com") | Some("www.github.com") => {}
            _ => {
                return Err(RepoRagError::InvalidInput(format!(
                    "Unsupported repository host: {}",
                    trimmed
                )))
            }
        }
        url.path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).map(|p| p.to_string()).collect())
            .unwrap_or_default()
    } else {
        let lower = trimmed.to_ascii_lowercase();
        let path = ["www.github.com/", "github.com/"]
            .iter()
            .find(|host| lower.starts_with(*host))
            .map_or(trimmed, |host| &trimmed[host.len()..]);
        path.split('/')
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string())
            .collect()
    };

    if segments.len() != 2 {
        return Err(RepoRagError::InvalidInput(format!(
            "Invalid GitHub URL format: {}",
            trimmed
        )));
    }

    let owner = segments[0].clone();
    let name = segments[1].trim_end_matches(".git").to_string();
    let valid = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if !valid(&owner) || !valid(&name) {
        return Err(RepoRagError::InvalidInput(format!(
            "Invalid GitHub URL format: {}",
            trimmed
        )));
    }

    Ok(RepoRef { owner, name })
}
