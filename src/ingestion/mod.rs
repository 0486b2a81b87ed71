// repolens/src/ingestion/mod.rs
pub mod hash_tracker;
pub mod loader;

use crate::config::Settings;
use crate::credentials::CredentialPool;
use crate::embedding::generate_embedding;
use crate::error::PipelineResult;
use crate::gemini::LanguageModel;
use crate::models::NewEmbedding;
use crate::ratelimit::RateLimiter;
use crate::store::Store;
use crate::summarize::summarize_code;
use futures::future::join_all;
use hash_tracker::{compute_hash, HashTracker};
use loader::RepoLoader;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Summarises and embeds every file of a repository into the store.
///
/// Files are processed one at a time. File `i` goes to credential slot
/// `i mod N` and waits for that slot's rate limiter before each model call.
/// Records are buffered and written together once the loop ends, including
/// when the run was cancelled part way.
pub struct IndexingPipeline {
    store: Arc<dyn Store>,
    loader: RepoLoader,
    models: Arc<CredentialPool<dyn LanguageModel>>,
    limiter: Arc<RateLimiter>,
    max_file_chars: usize,
    embedding_dimension: usize,
    delay: Duration,
}

impl IndexingPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        loader: RepoLoader,
        models: Arc<CredentialPool<dyn LanguageModel>>,
        limiter: Arc<RateLimiter>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            loader,
            models,
            limiter,
            max_file_chars: settings.max_file_chars,
            embedding_dimension: settings.embedding_dimension,
            delay: settings.index_delay,
        }
    }

    pub async fn index_repository(
        &self,
        project_id: &str,
        url: &str,
        token: Option<&str>,
        cancel: &CancellationToken,
    ) -> PipelineResult<IndexReport> {
        let snapshot = self.loader.load_snapshot(url, token).await?;
        let docs = &snapshot.documents;

        let tracker = match HashTracker::load(self.store.as_ref(), project_id).await {
            Ok(tracker) => tracker,
            Err(e) => {
                warn!(project_id, error = %e, "Could not read stored hashes, indexing every file");
                HashTracker::default()
            }
        };

        let mut report = IndexReport {
            total_files: docs.len(),
            failures_by_credential: vec![0; self.models.len()],
            ..Default::default()
        };
        let mut pending: Vec<NewEmbedding> = Vec::new();

        for (i, doc) in docs.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let content_hash = compute_hash(&doc.content);
            if tracker.is_unchanged(&doc.path, &content_hash) {
                report.skipped_unchanged += 1;
                continue;
            }

            let slot = self.models.slot(i);
            tokio::select! {
                _ = self.limiter.wait_for_slot(slot.index) => {}
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
            }
            debug!(path = %doc.path, slot = slot.index, "Summarising file");

            let summary = summarize_code(slot.client.as_ref(), doc, self.max_file_chars).await;
            if summary.is_empty() {
                report.failed += 1;
                report.failures_by_credential[slot.index] += 1;
            } else {
                let embedding =
                    generate_embedding(slot.client.as_ref(), &summary, self.embedding_dimension).await;
                if embedding.is_empty() {
                    report.missing_embeddings += 1;
                    report.failures_by_credential[slot.index] += 1;
                }
                report.summarized += 1;
                pending.push(NewEmbedding {
                    project_id: project_id.to_string(),
                    file_name: doc.path.clone(),
                    source_code: doc.content.clone(),
                    summary,
                    embedding,
                    content_hash,
                });
            }

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        if report.cancelled {
            warn!(project_id, processed = pending.len(), "Indexing cancelled, saving what was summarised");
        }

        let outcomes = join_all(pending.iter().map(|record| async move {
            (record, self.store.persist_embedding(record).await)
        }))
        .await;
        for (record, outcome) in outcomes {
            match outcome {
                Ok(_) => report.persisted += 1,
                Err(e) => {
                    warn!(path = %record.file_name, error = %e, "Failed to save embedding");
                    report.persist_failures += 1;
                }
            }
        }

        // A cancelled run has not seen every file, so nothing is pruned.
        if !report.cancelled {
            self.cleanup_stale_files(project_id, &snapshot.tree_paths, &mut report)
                .await;
        }

        info!(project_id, "{report}");
        Ok(report)
    }

    /// Deletes rows for files that are no longer in the repository tree.
    async fn cleanup_stale_files(&self, project_id: &str, tree_paths: &HashSet<String>, report: &mut IndexReport) {
        match self.store.remove_missing_files(project_id, tree_paths).await {
            Ok(0) => {}
            Ok(removed) => {
                info!(project_id, removed, "Removed records for deleted files");
                report.removed_stale = removed;
            }
            Err(e) => warn!(project_id, error = %e, "Failed to remove records for deleted files"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub total_files: usize,
    pub summarized: usize,
    pub skipped_unchanged: usize,
    pub failed: usize,
    pub missing_embeddings: usize,
    pub persisted: usize,
    pub persist_failures: usize,
    pub removed_stale: usize,
    /// Model failures in this run, indexed by credential slot.
    pub failures_by_credential: Vec<usize>,
    pub cancelled: bool,
}

impl std::fmt::Display for IndexReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Indexing: {} files ({} summarised, {} unchanged, {} failed), {} saved, {} save errors, {} removed",
            self.total_files,
            self.summarized,
            self.skipped_unchanged,
            self.failed,
            self.persisted,
            self.persist_failures,
            self.removed_stale
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::error::PipelineError;
    use crate::github::{RemoteCommit, RepoRef, SourceHost, TreeEntry};
    use crate::store::SqliteStore;
    use crate::LensEngine;
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    struct FlatRepo(Vec<(&'static str, &'static str)>);

    #[async_trait]
    impl SourceHost for FlatRepo {
        async fn default_branch(&self, _repo: &RepoRef, _token: Option<&str>) -> Result<String> {
            Ok("main".into())
        }

        async fn list_tree(&self, _repo: &RepoRef, _branch: &str, _token: Option<&str>) -> Result<Vec<TreeEntry>> {
            Ok(self
                .0
                .iter()
                .map(|(path, _)| TreeEntry {
                    path: path.to_string(),
                    kind: "blob".into(),
                    sha: path.to_string(),
                })
                .collect())
        }

        async fn fetch_blob(&self, _repo: &RepoRef, sha: &str, _token: Option<&str>) -> Result<Vec<u8>> {
            match self.0.iter().find(|(path, _)| *path == sha) {
                Some((_, body)) => Ok(body.as_bytes().to_vec()),
                None => bail!("missing blob"),
            }
        }

        async fn list_commits(&self, _repo: &RepoRef, _token: Option<&str>) -> Result<Vec<RemoteCommit>> {
            Ok(Vec::new())
        }

        async fn commit_patches(&self, _repo: &RepoRef, _sha: &str, _token: Option<&str>) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    /// Summarises everything as "S" unless the prompt mentions `poison`.
    struct KeyedModel {
        poison: Option<&'static str>,
        embed: bool,
    }

    #[async_trait]
    impl LanguageModel for KeyedModel {
        async fn generate_content(&self, prompt: &str) -> Result<String> {
            match self.poison {
                Some(p) if prompt.contains(p) => bail!("400 bad request"),
                _ => Ok("S".into()),
            }
        }

        async fn embed_content(&self, _text: &str, dimensionality: usize) -> Result<Vec<f32>> {
            if !self.embed {
                bail!("429 quota");
            }
            Ok(vec![0.5; dimensionality])
        }
    }

    fn settings() -> Settings {
        Settings {
            index_delay: Duration::ZERO,
            ..Settings::default()
        }
    }

    fn pipeline(engine: &LensEngine, files: Vec<(&'static str, &'static str)>, models: Vec<KeyedModel>) -> IndexingPipeline {
        let settings = settings();
        let mut models = models.into_iter();
        let pool = CredentialPool::build(
            (0..models.len()).map(|i| Credential::new(format!("key-{i}"))).collect(),
            |_| {
                let model = models.next().ok_or_else(|| anyhow::anyhow!("no model"))?;
                Ok(Arc::new(model) as Arc<dyn LanguageModel>)
            },
        )
        .unwrap();
        let store: Arc<SqliteStore> = engine.store().clone();
        IndexingPipeline::new(
            store,
            RepoLoader::new(Arc::new(FlatRepo(files)), &settings).unwrap(),
            Arc::new(pool),
            engine.limiter().clone(),
            &settings,
        )
    }

    const URL: &str = "https://github.com/acme/widgets";

    #[tokio::test]
    async fn unchanged_files_are_skipped_on_reindex() {
        let engine = LensEngine::in_memory(settings()).unwrap();
        let files = vec![("a.rs", "fn a() {}"), ("b.rs", "fn b() {}")];
        let good = || KeyedModel { poison: None, embed: true };

        let first = pipeline(&engine, files.clone(), vec![good()])
            .index_repository("p1", URL, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.persisted, 2);

        let second = pipeline(&engine, files, vec![good()])
            .index_repository("p1", URL, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.skipped_unchanged, 2);
        assert_eq!(second.persisted, 0);
    }

    #[tokio::test]
    async fn edited_file_replaces_its_previous_record() {
        let engine = LensEngine::in_memory(settings()).unwrap();
        let good = || KeyedModel { poison: None, embed: true };
        pipeline(&engine, vec![("a.rs", "v1")], vec![good()])
            .index_repository("p1", URL, None, &CancellationToken::new())
            .await
            .unwrap();

        let report = pipeline(&engine, vec![("a.rs", "v2")], vec![good()])
            .index_repository("p1", URL, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.summarized, 1);

        let records = engine.store().embedding_records("p1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_name, "a.rs");
        assert_eq!(records[0].source_code, "v2");
    }

    #[tokio::test]
    async fn deleted_file_loses_its_record() {
        let engine = LensEngine::in_memory(settings()).unwrap();
        let good = || KeyedModel { poison: None, embed: true };
        pipeline(&engine, vec![("a.rs", "a"), ("b.rs", "b")], vec![good()])
            .index_repository("p1", URL, None, &CancellationToken::new())
            .await
            .unwrap();

        let report = pipeline(&engine, vec![("b.rs", "b")], vec![good()])
            .index_repository("p1", URL, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.removed_stale, 1);
        let records = engine.store().embedding_records("p1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_name, "b.rs");
    }

    #[tokio::test]
    async fn record_without_vector_is_embedded_on_next_run() {
        let engine = LensEngine::in_memory(settings()).unwrap();
        let files = vec![("a.rs", "fn a() {}")];
        pipeline(&engine, files.clone(), vec![KeyedModel { poison: None, embed: false }])
            .index_repository("p1", URL, None, &CancellationToken::new())
            .await
            .unwrap();

        let report = pipeline(&engine, files, vec![KeyedModel { poison: None, embed: true }])
            .index_repository("p1", URL, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.skipped_unchanged, 0);
        assert_eq!(report.summarized, 1);
        let records = engine.store().embedding_records("p1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].summary_embedding.is_some());
    }

    #[tokio::test]
    async fn failing_credential_only_loses_its_own_files() {
        let engine = LensEngine::in_memory(settings()).unwrap();
        let files = vec![("a.rs", "a"), ("b.rs", "b"), ("c.rs", "c"), ("d.rs", "d")];
        let report = pipeline(
            &engine,
            files,
            vec![
                KeyedModel { poison: None, embed: true },
                KeyedModel { poison: Some(""), embed: true },
            ],
        )
        .index_repository("p1", URL, None, &CancellationToken::new())
        .await
        .unwrap();

        assert_eq!(report.failed, 2);
        assert_eq!(report.failures_by_credential, vec![0, 2]);
        let names: Vec<String> = engine
            .store()
            .embedding_records("p1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.file_name)
            .collect();
        assert_eq!(names, vec!["a.rs", "c.rs"]);
    }

    #[tokio::test]
    async fn missing_embedding_still_saves_summary() {
        let engine = LensEngine::in_memory(settings()).unwrap();
        let report = pipeline(&engine, vec![("a.rs", "a")], vec![KeyedModel { poison: None, embed: false }])
            .index_repository("p1", URL, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.missing_embeddings, 1);
        let records = engine.store().embedding_records("p1").await.unwrap();
        assert_eq!(records[0].summary, "S");
        assert!(records[0].summary_embedding.is_none());
    }

    #[tokio::test]
    async fn cancelled_run_processes_nothing_further() {
        let engine = LensEngine::in_memory(settings()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = pipeline(&engine, vec![("a.rs", "a")], vec![KeyedModel { poison: None, embed: true }])
            .index_repository("p1", URL, None, &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.persisted, 0);
    }

    #[tokio::test]
    async fn invalid_url_passes_through() {
        let engine = LensEngine::in_memory(settings()).unwrap();
        let err = pipeline(&engine, Vec::new(), vec![KeyedModel { poison: None, embed: true }])
            .index_repository("p1", "not a url", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidUrl(_)));
    }
}
