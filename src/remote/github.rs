use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::config::GithubConfig;
use crate::error::{Result, RepoRagError};
use crate::remote::{EntryKind, RemoteRepo, RepoRef, RepoSource, TreeEntry};

#[derive(Deserialize)]
struct RepoResponse {
    id: i64,
    name: String,
    default_branch: String,
    owner: OwnerResponse,
}

#[derive(Deserialize)]
struct OwnerResponse {
    login: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// GitHub REST client (metadata + tree) and raw-content client
pub struct GithubClient {
    client: Client,
    api_base_url: String,
    raw_base_url: String,
    token: Option<String>,
}

impl GithubClient {
    /// # Panics
    ///
    /// Panics if HTTP client cannot be created (should not happen in normal operation)
    pub fn new(config: &GithubConfig, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(format!("reporag/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            raw_base_url: config.raw_base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Build `base/seg1/seg2/...` with every segment percent-encoded
    fn join_segments<'a>(base: &str, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = Url::parse(base)
            .map_err(|e| RepoRagError::Config(format!("Invalid base URL {}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| RepoRagError::Config(format!("Base URL cannot have a path: {}", base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        self.authorized(request)
            .send()
            .await
            .map_err(|e| RepoRagError::Remote(format!("Network error: {}", e)))
    }
}

#[async_trait]
impl RepoSource for GithubClient {
    async fn resolve(&self, repo: &RepoRef) -> Result<RemoteRepo> {
        let url = Self::join_segments(&self.api_base_url, ["repos", repo.owner.as_str(), repo.name.as_str()])?;
        let response = self
            .send(self.client.get(url).header("Accept", "application/vnd.github+json"))
            .await?;

        let status = response.status();
        if matches!(status, StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(RepoRagError::NotFound(format!(
                "GitHub repo {} not found or access denied ({})",
                repo.full_name(),
                status
            )));
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RepoRagError::Remote(format!("GitHub API error {}: {}", status, body)));
        }

        let meta: RepoResponse = response
            .json()
            .await
            .map_err(|e| RepoRagError::Remote(format!("Failed to parse repository metadata: {}", e)))?;

        Ok(RemoteRepo {
            owner: meta.owner.login,
            name: meta.name,
            remote_id: meta.id,
            default_branch: meta.default_branch,
        })
    }

    async fn list_tree(&self, repo: &RemoteRepo) -> Result<Vec<TreeEntry>> {
        let mut url = Self::join_segments(
            &self.api_base_url,
            ["repos", repo.owner.as_str(), repo.name.as_str(), "git", "trees", repo.default_branch.as_str()],
        )?;
        url.query_pairs_mut().append_pair("recursive", "1");

        let response = self
            .send(self.client.get(url).header("Accept", "application/vnd.github+json"))
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RepoRagError::NotFound(format!(
                "Branch {} of {} not found",
                repo.default_branch,
                repo.full_name()
            )));
        }
        if !status.is_success() {
            return Err(RepoRagError::Remote(format!("GitHub tree listing failed: {}", status)));
        }

        let tree: TreeResponse = response
            .json()
            .await
            .map_err(|e| RepoRagError::Remote(format!("Failed to parse tree listing: {}", e)))?;

        if tree.truncated {
            log::warn!(
                "Tree listing for {} was truncated by GitHub; only {} entries indexed",
                repo.full_name(),
                tree.tree.len()
            );
        }

        Ok(tree
            .tree
            .into_iter()
            .map(|item| TreeEntry {
                path: item.path,
                kind: match item.kind.as_str() {
                    "blob" => EntryKind::Blob,
                    "tree" => EntryKind::Tree,
                    _ => EntryKind::Other,
                },
            })
            .collect())
    }

    async fn fetch_file(&self, repo: &RemoteRepo, path: &str) -> Result<Vec<u8>> {
        let segments = [repo.owner.as_str(), repo.name.as_str(), repo.default_branch.as_str()]
            .into_iter()
            .chain(path.split('/').filter(|s| !s.is_empty()));
        let url = Self::join_segments(&self.raw_base_url, segments)?;

        let response = self
            .send(self.client.get(url).header("Accept", "application/vnd.github.v3.raw"))
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RepoRagError::NotFound(format!("{} not found in {}", path, repo.full_name())));
        }
        if !status.is_success() {
            return Err(RepoRagError::Remote(format!("Fetching {} failed: {}", path, status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RepoRagError::Remote(format!("Failed to read {}: {}", path, e)))?;
        Ok(bytes.to_vec())
    }
}
