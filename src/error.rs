use thiserror::Error;

/// Structural failures that surface to the caller of a pipeline.
///
/// Per-file and per-commit model failures never show up here; they are
/// logged and replaced by empty results inside the pipelines.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid repository URL (expected scheme://host/owner/repo): {0}")]
    InvalidUrl(String),

    #[error("project not found or has no repository URL: {0}")]
    ProjectNotFound(String),

    #[error("failed to index repository {url}: {source}")]
    Indexing {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
