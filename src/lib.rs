pub mod commits;
pub mod config;
pub mod credentials;
pub mod embedding;
pub mod error;
pub mod gemini;
pub mod github;
pub mod ingestion;
pub mod models;
pub mod ratelimit;
pub mod schema;
pub mod search;
pub mod store;
pub mod summarize;

use crate::commits::CommitPoller;
use crate::config::Settings;
use crate::credentials::{Credential, CredentialPool};
use crate::error::PipelineResult;
use crate::gemini::{GeminiClient, LanguageModel};
use crate::github::{GithubClient, SourceHost};
use crate::ingestion::loader::RepoLoader;
use crate::ingestion::IndexingPipeline;
use crate::ratelimit::RateLimiter;
use crate::search::SearchEngine;
use crate::store::SqliteStore;
use anyhow::Result;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

/// Shared handles for one process: the database, the settings, and the
/// rate limiter every pipeline draws from.
#[derive(Clone)]
pub struct LensEngine {
    db: Arc<Mutex<Connection>>,
    store: Arc<SqliteStore>,
    limiter: Arc<RateLimiter>,
    settings: Arc<Settings>,
}

impl LensEngine {
    pub fn new(settings: Settings) -> Result<Self> {
        let conn = Connection::open(&settings.db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::run_migrations(&conn)?;
        Ok(Self::with_connection(conn, settings))
    }

    pub fn in_memory(settings: Settings) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Self::with_connection(conn, settings))
    }

    fn with_connection(conn: Connection, settings: Settings) -> Self {
        let db = Arc::new(Mutex::new(conn));
        let limiter = RateLimiter::new(
            settings.rate_limit_requests,
            settings.rate_limit_window,
            settings.rate_limit_retry,
        );
        Self {
            store: Arc::new(SqliteStore::new(db.clone())),
            db,
            limiter: Arc::new(limiter),
            settings: Arc::new(settings),
        }
    }

    pub fn db(&self) -> &Arc<Mutex<Connection>> {
        &self.db
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// One Gemini client per configured key, in key order.
    pub fn model_pool(&self) -> PipelineResult<Arc<CredentialPool<dyn LanguageModel>>> {
        self.settings.require_credentials()?;
        let credentials = self
            .settings
            .gemini_api_keys
            .iter()
            .map(Credential::new)
            .collect();
        let pool = CredentialPool::build(credentials, |credential| {
            let client = GeminiClient::new(credential, &self.settings)?;
            Ok(Arc::new(client) as Arc<dyn LanguageModel>)
        })?;
        Ok(Arc::new(pool))
    }

    pub fn source_host(&self) -> Result<Arc<dyn SourceHost>> {
        Ok(Arc::new(GithubClient::new(&self.settings)?))
    }

    pub fn loader(&self, host: Arc<dyn SourceHost>) -> PipelineResult<RepoLoader> {
        RepoLoader::new(host, &self.settings)
    }

    pub fn indexing_pipeline(&self) -> PipelineResult<IndexingPipeline> {
        let loader = self.loader(self.source_host()?)?;
        Ok(IndexingPipeline::new(
            self.store.clone(),
            loader,
            self.model_pool()?,
            self.limiter.clone(),
            &self.settings,
        ))
    }

    pub fn commit_poller(&self) -> PipelineResult<CommitPoller> {
        Ok(CommitPoller::new(
            self.store.clone(),
            self.source_host()?,
            self.model_pool()?,
            self.limiter.clone(),
            &self.settings,
        ))
    }

    pub fn search_engine(&self) -> PipelineResult<SearchEngine> {
        Ok(SearchEngine::new(
            self.store.clone(),
            self.model_pool()?,
            self.limiter.clone(),
            self.settings.embedding_dimension,
        ))
    }
}
