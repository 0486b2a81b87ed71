use crate::error::{PipelineError, PipelineResult};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.0-flash-lite";
pub const DEFAULT_EMBEDDING_MODEL: &str = "gemini-embedding-001";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;

/// Number of numbered secondary keys read after `GEMINI_API_KEY`.
const MAX_SECONDARY_KEYS: usize = 9;

/// Process-wide settings, read once at startup.
#[derive(Clone)]
pub struct Settings {
    pub gemini_api_keys: Vec<String>,
    pub github_token: Option<String>,
    pub github_api_url: String,
    pub gemini_api_url: String,
    pub generation_model: String,
    pub embedding_model: String,
    pub rate_limit_requests: usize,
    pub rate_limit_window: Duration,
    pub rate_limit_retry: Duration,
    pub max_file_chars: usize,
    pub max_diff_chars: usize,
    pub embedding_dimension: usize,
    pub index_delay: Duration,
    pub commit_delay: Duration,
    pub max_commits: usize,
    pub loader_concurrency: usize,
    pub request_timeout: Duration,
    pub db_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gemini_api_keys: Vec::new(),
            github_token: None,
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            gemini_api_url: DEFAULT_GEMINI_API_URL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            rate_limit_requests: 30,
            rate_limit_window: Duration::from_millis(60_000),
            rate_limit_retry: Duration::from_millis(500),
            max_file_chars: 10_000,
            max_diff_chars: 500_000,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            index_delay: Duration::from_millis(210),
            commit_delay: Duration::from_millis(200),
            max_commits: 10,
            loader_concurrency: 5,
            request_timeout: Duration::from_secs(60),
            db_path: PathBuf::from("repolens.db"),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("gemini_api_keys", &format!("<{} keys>", self.gemini_api_keys.len()))
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("github_api_url", &self.github_api_url)
            .field("gemini_api_url", &self.gemini_api_url)
            .field("generation_model", &self.generation_model)
            .field("embedding_model", &self.embedding_model)
            .field("rate_limit_requests", &self.rate_limit_requests)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("max_file_chars", &self.max_file_chars)
            .field("max_diff_chars", &self.max_diff_chars)
            .field("embedding_dimension", &self.embedding_dimension)
            .field("index_delay", &self.index_delay)
            .field("commit_delay", &self.commit_delay)
            .field("max_commits", &self.max_commits)
            .field("loader_concurrency", &self.loader_concurrency)
            .field("request_timeout", &self.request_timeout)
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl Settings {
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let mut gemini_api_keys = Vec::new();
        if let Some(primary) = get("GEMINI_API_KEY") {
            gemini_api_keys.push(primary);
        }
        for n in 2..=MAX_SECONDARY_KEYS + 1 {
            if let Some(key) = get(&format!("GEMINI_API_KEY_{n}")) {
                gemini_api_keys.push(key);
            }
        }

        let settings = Self {
            gemini_api_keys,
            github_token: get("GITHUB_TOKEN"),
            github_api_url: get("GITHUB_API_URL").unwrap_or(defaults.github_api_url),
            gemini_api_url: get("GEMINI_API_URL").unwrap_or(defaults.gemini_api_url),
            generation_model: get("GEMINI_MODEL").unwrap_or(defaults.generation_model),
            embedding_model: get("GEMINI_EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            rate_limit_requests: parse_or(&get, "RATE_LIMIT_REQUESTS", defaults.rate_limit_requests)?,
            rate_limit_window: millis_or(&get, "RATE_LIMIT_WINDOW_MS", defaults.rate_limit_window)?,
            rate_limit_retry: millis_or(&get, "RATE_LIMIT_RETRY_MS", defaults.rate_limit_retry)?,
            max_file_chars: parse_or(&get, "MAX_FILE_CHARS", defaults.max_file_chars)?,
            max_diff_chars: parse_or(&get, "MAX_DIFF_CHARS", defaults.max_diff_chars)?,
            embedding_dimension: parse_or(&get, "EMBEDDING_DIMENSION", defaults.embedding_dimension)?,
            index_delay: millis_or(&get, "INDEX_DELAY_MS", defaults.index_delay)?,
            commit_delay: millis_or(&get, "COMMIT_DELAY_MS", defaults.commit_delay)?,
            max_commits: parse_or(&get, "MAX_COMMITS", defaults.max_commits)?,
            loader_concurrency: parse_or(&get, "LOADER_CONCURRENCY", defaults.loader_concurrency)?,
            request_timeout: Duration::from_secs(parse_or(
                &get,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            db_path: get("REPOLENS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.rate_limit_requests == 0 {
            return Err(PipelineError::Config("RATE_LIMIT_REQUESTS must be > 0".into()));
        }
        if self.rate_limit_window.is_zero() {
            return Err(PipelineError::Config("RATE_LIMIT_WINDOW_MS must be > 0".into()));
        }
        if self.embedding_dimension == 0 {
            return Err(PipelineError::Config("EMBEDDING_DIMENSION must be > 0".into()));
        }
        if self.loader_concurrency == 0 {
            return Err(PipelineError::Config("LOADER_CONCURRENCY must be > 0".into()));
        }
        Ok(())
    }

    /// Fails when no model credential is configured. Only the model-calling
    /// commands need this; project bookkeeping works without keys.
    pub fn require_credentials(&self) -> PipelineResult<()> {
        if self.gemini_api_keys.is_empty() {
            return Err(PipelineError::Config(
                "GEMINI_API_KEY environment variable not set".into(),
            ));
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> PipelineResult<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PipelineError::Config(format!("{key} is not a valid number: {raw}"))),
    }
}

fn millis_or<G>(get: &G, key: &str, default: Duration) -> PipelineResult<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_millis() as u64).map(Duration::from_millis)
}
