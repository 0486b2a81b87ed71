// repolens/src/ingestion/hash_tracker.rs
use crate::store::Store;
use anyhow::Result;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Content hashes already summarised for one project. A file whose path and
/// hash both match a stored record is not sent to the model again.
#[derive(Debug, Default)]
pub struct HashTracker {
    known: HashSet<(String, String)>,
}

impl HashTracker {
    pub async fn load(store: &dyn Store, project_id: &str) -> Result<Self> {
        let known = store.content_hashes(project_id).await?.into_iter().collect();
        Ok(Self { known })
    }

    pub fn is_unchanged(&self, file_name: &str, content_hash: &str) -> bool {
        self.known
            .contains(&(file_name.to_string(), content_hash.to_string()))
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
