// repolens/src/github.rs
use crate::config::Settings;
use crate::error::{PipelineError, PipelineResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::warn;

/// Owner and repository name taken from `scheme://host/owner/repo[...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn parse(url: &str) -> PipelineResult<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://[^/]+/([^/?#]+)/([^/?#]+)")
                .expect("repository URL pattern is valid")
        });

        let caps = pattern
            .captures(url.trim())
            .ok_or_else(|| PipelineError::InvalidUrl(url.to_string()))?;
        let owner = caps[1].to_string();
        let repo = caps[2].trim_end_matches(".git").to_string();
        if repo.is_empty() {
            return Err(PipelineError::InvalidUrl(url.to_string()));
        }
        Ok(Self { owner, repo })
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub kind: String,
    pub sha: String,
}

impl TreeEntry {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

/// A commit as listed by the host, before any summarisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommit {
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_avatar: String,
    pub date: String,
}

/// Source host operations used by the loader and the commit poller.
/// `token` overrides the host's default credential for a single call.
#[async_trait]
pub trait SourceHost: Send + Sync {
    async fn default_branch(&self, repo: &RepoRef, token: Option<&str>) -> Result<String>;

    async fn list_tree(&self, repo: &RepoRef, branch: &str, token: Option<&str>) -> Result<Vec<TreeEntry>>;

    async fn fetch_blob(&self, repo: &RepoRef, sha: &str, token: Option<&str>) -> Result<Vec<u8>>;

    /// Most recent commits in host order.
    async fn list_commits(&self, repo: &RepoRef, token: Option<&str>) -> Result<Vec<RemoteCommit>>;

    /// Per-file patches of one commit; files without a patch are left out.
    async fn commit_patches(&self, repo: &RepoRef, sha: &str, token: Option<&str>) -> Result<Vec<String>>;
}

#[derive(Clone)]
pub struct GithubClient {
    base_url: String,
    default_token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct CommitListItem {
    sha: String,
    commit: CommitDetail,
    author: Option<AccountInfo>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    message: String,
    author: Option<GitAuthor>,
}

#[derive(Debug, Deserialize)]
struct GitAuthor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    date: String,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    #[serde(default)]
    avatar_url: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    files: Vec<CommitFile>,
}

#[derive(Debug, Deserialize)]
struct CommitFile {
    patch: Option<String>,
}

impl GithubClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(concat!("repolens/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: settings.github_api_url.trim_end_matches('/').to_string(),
            default_token: settings.github_token.clone(),
            client,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, token: Option<&str>) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = token.or(self.default_token.as_deref()) {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to call GET {path}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GET {path} returned {status}: {body}");
        }
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse GET {path} response"))
    }
}

#[async_trait]
impl SourceHost for GithubClient {
    async fn default_branch(&self, repo: &RepoRef, token: Option<&str>) -> Result<String> {
        let data: RepoResponse = self
            .get(&format!("/repos/{}/{}", repo.owner, repo.repo), token)
            .await?;
        Ok(data.default_branch)
    }

    async fn list_tree(&self, repo: &RepoRef, branch: &str, token: Option<&str>) -> Result<Vec<TreeEntry>> {
        let data: TreeResponse = self
            .get(
                &format!("/repos/{}/{}/git/trees/{}?recursive=1", repo.owner, repo.repo, branch),
                token,
            )
            .await?;
        if data.truncated {
            warn!(repo = %repo, "Tree listing was truncated by the host");
        }
        Ok(data
            .tree
            .into_iter()
            .map(|item| TreeEntry {
                path: item.path,
                kind: item.kind,
                sha: item.sha,
            })
            .collect())
    }

    async fn fetch_blob(&self, repo: &RepoRef, sha: &str, token: Option<&str>) -> Result<Vec<u8>> {
        let data: BlobResponse = self
            .get(&format!("/repos/{}/{}/git/blobs/{}", repo.owner, repo.repo, sha), token)
            .await?;
        if data.encoding != "base64" {
            return Ok(data.content.into_bytes());
        }
        let compact: String = data.content.split_whitespace().collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .with_context(|| format!("Blob {sha} is not valid base64"))
    }

    async fn list_commits(&self, repo: &RepoRef, token: Option<&str>) -> Result<Vec<RemoteCommit>> {
        let data: Vec<CommitListItem> = self
            .get(&format!("/repos/{}/{}/commits", repo.owner, repo.repo), token)
            .await?;
        Ok(data
            .into_iter()
            .map(|item| {
                let (author_name, date) = item
                    .commit
                    .author
                    .map(|a| (a.name, a.date))
                    .unwrap_or_default();
                RemoteCommit {
                    sha: item.sha,
                    message: item.commit.message,
                    author_name,
                    author_avatar: item.author.map(|a| a.avatar_url).unwrap_or_default(),
                    date,
                }
            })
            .collect())
    }

    async fn commit_patches(&self, repo: &RepoRef, sha: &str, token: Option<&str>) -> Result<Vec<String>> {
        let data: CommitResponse = self
            .get(&format!("/repos/{}/{}/commits/{}", repo.owner, repo.repo, sha), token)
            .await?;
        Ok(data
            .files
            .into_iter()
            .filter_map(|f| f.patch)
            .filter(|p| !p.is_empty())
            .collect())
    }
}
