// repolens/src/models.rs
//! Records that flow between the pipelines and the store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub github_url: String,
    pub created_at: String,
}

/// A file summary ready to be written. An empty `embedding` is stored as an
/// absent vector column.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEmbedding {
    pub project_id: String,
    pub file_name: String,
    pub source_code: String,
    pub summary: String,
    pub embedding: Vec<f32>,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    pub id: String,
    pub project_id: String,
    pub file_name: String,
    pub source_code: String,
    pub summary: String,
    pub summary_embedding: Option<Vec<f32>>,
    pub content_hash: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewCommit {
    pub project_id: String,
    pub commit_hash: String,
    pub commit_message: String,
    pub commit_author_name: String,
    pub commit_author_avatar: String,
    pub commit_date: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRecord {
    pub id: String,
    pub project_id: String,
    pub commit_hash: String,
    pub commit_message: String,
    pub commit_author_name: String,
    pub commit_author_avatar: String,
    pub commit_date: String,
    /// Empty when the model produced nothing; shown as "no summary available".
    pub summary: String,
    pub created_at: String,
}
