// repolens/src/search/mod.rs
pub mod vector;

use crate::credentials::CredentialPool;
use crate::embedding::generate_embedding;
use crate::gemini::LanguageModel;
use crate::ratelimit::RateLimiter;
use crate::store::Store;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub record_id: String,
    pub file_name: String,
    pub summary: String,
    pub score: f64,
}

/// Semantic lookup over a project's stored summary embeddings.
pub struct SearchEngine {
    store: Arc<dyn Store>,
    models: Arc<CredentialPool<dyn LanguageModel>>,
    limiter: Arc<RateLimiter>,
    dimension: usize,
}

impl SearchEngine {
    pub fn new(
        store: Arc<dyn Store>,
        models: Arc<CredentialPool<dyn LanguageModel>>,
        limiter: Arc<RateLimiter>,
        dimension: usize,
    ) -> Self {
        Self {
            store,
            models,
            limiter,
            dimension,
        }
    }

    /// Embeds `query` and returns the `top_k` closest files. An empty query,
    /// or a query the model cannot embed, yields no hits.
    pub async fn search(&self, project_id: &str, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let slot = self.models.slot(0);
        self.limiter.wait_for_slot(slot.index).await;
        let query_vec = generate_embedding(slot.client.as_ref(), query, self.dimension).await;
        if query_vec.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.store.embedding_records(project_id).await?;
        let candidates = records.len();
        let hits = vector::rank_by_similarity(records, &query_vec, top_k);
        debug!(project_id, candidates, hits = hits.len(), "Vector search");
        Ok(hits)
    }
}
