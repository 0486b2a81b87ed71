use crate::config::Settings;
use crate::error::{PipelineError, PipelineResult};
use crate::github::{RepoRef, SourceHost, TreeEntry};
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lock files: large, generated, and useless to summarise.
pub const IGNORED_FILES: &[&str] = &[
    "package-lock.json",
    "yarn-lock",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "Cargo.lock",
];

pub const IGNORED_PATHS: &[&str] = &["**/node_modules/**"];

/// One text file from the default branch.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub path: String,
    pub content: String,
}

/// Loaded documents plus every indexable path in the tree, including the
/// ones whose blobs could not be read this time.
#[derive(Debug, Default)]
pub struct RepoSnapshot {
    pub documents: Vec<SourceDocument>,
    pub tree_paths: HashSet<String>,
}

pub struct RepoLoader {
    host: Arc<dyn SourceHost>,
    ignored_paths: GlobSet,
    concurrency: usize,
}

impl RepoLoader {
    pub fn new(host: Arc<dyn SourceHost>, settings: &Settings) -> PipelineResult<Self> {
        Ok(Self {
            host,
            ignored_paths: build_globset(IGNORED_PATHS)?,
            concurrency: settings.loader_concurrency.max(1),
        })
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        IGNORED_FILES.contains(&file_name) || self.ignored_paths.is_match(path)
    }

    /// Fetches every non-ignored text file, in tree order. Unreadable or
    /// non-UTF-8 blobs are skipped with a warning.
    pub async fn load_repository(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> PipelineResult<Vec<SourceDocument>> {
        Ok(self.load_snapshot(url, token).await?.documents)
    }

    pub async fn load_snapshot(&self, url: &str, token: Option<&str>) -> PipelineResult<RepoSnapshot> {
        let repo = RepoRef::parse(url)?;
        let entries = self.candidate_entries(url, &repo, token).await?;
        debug!(repo = %repo, candidates = entries.len(), "Fetching blobs");
        let tree_paths: HashSet<String> = entries.iter().map(|e| e.path.clone()).collect();

        let host = self.host.as_ref();
        let repo_ref = &repo;
        let docs: Vec<Option<SourceDocument>> = stream::iter(entries)
            .map(|entry| async move {
                match host.fetch_blob(repo_ref, &entry.sha, token).await {
                    Ok(bytes) => match String::from_utf8(bytes) {
                        Ok(content) => Some(SourceDocument {
                            path: entry.path,
                            content,
                        }),
                        Err(_) => {
                            warn!(path = %entry.path, "Skipping non-UTF-8 file");
                            None
                        }
                    },
                    Err(e) => {
                        warn!(path = %entry.path, error = %e, "Failed to fetch file");
                        None
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let documents: Vec<SourceDocument> = docs.into_iter().flatten().collect();
        info!(repo = %repo, files = documents.len(), "Loaded repository");
        Ok(RepoSnapshot {
            documents,
            tree_paths,
        })
    }

    /// Number of files `load_repository` would attempt, without downloading them.
    pub async fn count_files(&self, url: &str, token: Option<&str>) -> PipelineResult<usize> {
        let repo = RepoRef::parse(url)?;
        Ok(self.candidate_entries(url, &repo, token).await?.len())
    }

    async fn candidate_entries(
        &self,
        url: &str,
        repo: &RepoRef,
        token: Option<&str>,
    ) -> PipelineResult<Vec<TreeEntry>> {
        let indexing = |source: anyhow::Error| PipelineError::Indexing {
            url: url.to_string(),
            source,
        };
        let branch = self
            .host
            .default_branch(repo, token)
            .await
            .map_err(indexing)?;
        let tree = self
            .host
            .list_tree(repo, &branch, token)
            .await
            .map_err(indexing)?;
        Ok(tree
            .into_iter()
            .filter(|entry| entry.is_blob() && !self.is_ignored(&entry.path))
            .collect())
    }
}

fn build_globset(patterns: &[&str]) -> PipelineResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| PipelineError::Config(format!("bad ignore pattern '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| PipelineError::Config(format!("failed to build ignore set: {e}")))
}
