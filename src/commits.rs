// repolens/src/commits.rs
use crate::config::Settings;
use crate::credentials::{CredentialPool, Slot};
use crate::error::{PipelineError, PipelineResult};
use crate::gemini::LanguageModel;
use crate::github::{RemoteCommit, RepoRef, SourceHost};
use crate::models::NewCommit;
use crate::ratelimit::RateLimiter;
use crate::store::Store;
use crate::summarize::{summarize_commit, truncate_chars};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How many of the newest remote commits are considered on each poll.
pub const LATEST_COMMITS_WINDOW: usize = 10;

/// Pulls a project's newest commits, summarises the ones not yet stored, and
/// saves them in one batch.
pub struct CommitPoller {
    store: Arc<dyn Store>,
    host: Arc<dyn SourceHost>,
    models: Arc<CredentialPool<dyn LanguageModel>>,
    limiter: Arc<RateLimiter>,
    max_commits: usize,
    max_diff_chars: usize,
    delay: Duration,
}

impl CommitPoller {
    pub fn new(
        store: Arc<dyn Store>,
        host: Arc<dyn SourceHost>,
        models: Arc<CredentialPool<dyn LanguageModel>>,
        limiter: Arc<RateLimiter>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            host,
            models,
            limiter,
            max_commits: settings.max_commits,
            max_diff_chars: settings.max_diff_chars,
            delay: settings.commit_delay,
        }
    }

    /// Returns the number of newly stored commits.
    pub async fn poll_commits(
        &self,
        project_id: &str,
        token: Option<&str>,
        cancel: &CancellationToken,
    ) -> PipelineResult<usize> {
        let url = self.project_url(project_id).await?;
        let repo = RepoRef::parse(&url)?;

        let latest = self
            .latest_commits(&repo, token)
            .await
            .with_context(|| format!("failed to list commits for {repo}"))?;
        let known = self
            .store
            .commit_hashes(project_id)
            .await
            .context("failed to read stored commit hashes")?;
        let unprocessed: Vec<RemoteCommit> = latest
            .into_iter()
            .filter(|c| !known.contains(&c.sha))
            .take(self.max_commits)
            .collect();
        if unprocessed.is_empty() {
            debug!(project_id, "No new commits");
            return Ok(0);
        }

        let mut records = Vec::with_capacity(unprocessed.len());
        for (i, commit) in unprocessed.into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(project_id, processed = records.len(), "Commit polling cancelled");
                break;
            }
            let slot = self.models.slot(i);
            let summary = match self.summarise(&repo, &commit.sha, slot, token, cancel).await {
                Ok(Some(summary)) => summary,
                Ok(None) => {
                    warn!(project_id, processed = records.len(), "Commit polling cancelled");
                    break;
                }
                Err(e) => {
                    warn!(sha = %commit.sha, error = %e, "Failed to summarise commit");
                    String::new()
                }
            };
            records.push(NewCommit {
                project_id: project_id.to_string(),
                commit_hash: commit.sha,
                commit_message: commit.message,
                commit_author_name: commit.author_name,
                commit_author_avatar: commit.author_avatar,
                commit_date: commit.date,
                summary,
            });
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        match self.store.insert_commits(&records).await {
            Ok(inserted) => {
                info!(project_id, inserted, "Saved commit summaries");
                Ok(inserted)
            }
            Err(e) => {
                warn!(project_id, error = %e, "Failed to save commits");
                Ok(0)
            }
        }
    }

    async fn project_url(&self, project_id: &str) -> PipelineResult<String> {
        let project = self
            .store
            .get_project(project_id)
            .await
            .map_err(PipelineError::Other)?;
        match project {
            Some(p) if !p.github_url.is_empty() => Ok(p.github_url),
            _ => Err(PipelineError::ProjectNotFound(project_id.to_string())),
        }
    }

    /// The newest commits on the default branch, newest first.
    async fn latest_commits(&self, repo: &RepoRef, token: Option<&str>) -> Result<Vec<RemoteCommit>> {
        let mut commits = self.host.list_commits(repo, token).await?;
        sort_newest_first(&mut commits);
        commits.truncate(LATEST_COMMITS_WINDOW);
        Ok(commits)
    }

    /// `None` when cancelled before the model was called; the commit is then
    /// left for the next poll.
    async fn summarise(
        &self,
        repo: &RepoRef,
        sha: &str,
        slot: &Slot<dyn LanguageModel>,
        token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let patches = self.host.commit_patches(repo, sha, token).await?;
        let diff = patches.join("\n");
        let diff = truncate_chars(&diff, self.max_diff_chars);
        if diff.is_empty() {
            return Ok(Some(String::new()));
        }
        tokio::select! {
            _ = self.limiter.wait_for_slot(slot.index) => {}
            _ = cancel.cancelled() => return Ok(None),
        }
        Ok(Some(summarize_commit(slot.client.as_ref(), diff).await))
    }
}

/// Stable sort by author date, newest first. Undated commits go last.
pub fn sort_newest_first(commits: &mut [RemoteCommit]) {
    commits.sort_by_cached_key(|c| Reverse(parse_date(&c.date)));
}

fn parse_date(date: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(date)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(sha: &str, date: &str) -> RemoteCommit {
        RemoteCommit {
            sha: sha.into(),
            message: String::new(),
            author_name: String::new(),
            author_avatar: String::new(),
            date: date.into(),
        }
    }

    #[test]
    fn sort_puts_newest_first_and_undated_last() {
        let mut commits = vec![
            remote("old", "2024-01-01T00:00:00Z"),
            remote("undated", ""),
            remote("new", "2024-03-01T00:00:00Z"),
            remote("mid", "2024-02-01T00:00:00+02:00"),
        ];
        sort_newest_first(&mut commits);
        let order: Vec<&str> = commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(order, vec!["new", "mid", "old", "undated"]);
    }

    #[test]
    fn sort_is_stable_for_equal_dates() {
        let mut commits = vec![
            remote("first", "2024-01-01T00:00:00Z"),
            remote("second", "2024-01-01T00:00:00Z"),
        ];
        sort_newest_first(&mut commits);
        assert_eq!(commits[0].sha, "first");
    }
}
