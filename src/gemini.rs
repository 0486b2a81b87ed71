use crate::config::Settings;
use crate::credentials::Credential;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The two model operations the pipelines need. One instance per credential.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate_content(&self, prompt: &str) -> Result<String>;

    async fn embed_content(&self, text: &str, dimensionality: usize) -> Result<Vec<f32>>;
}

#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    generation_model: String,
    embedding_model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddingRequest {
    model: String,
    content: Content,
    output_dimensionality: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl GeminiClient {
    pub fn new(credential: &Credential, settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            api_key: credential.expose().to_string(),
            base_url: settings.gemini_api_url.trim_end_matches('/').to_string(),
            generation_model: settings.generation_model.clone(),
            embedding_model: settings.embedding_model.clone(),
            client,
        })
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        model: &str,
        action: &str,
        body: &B,
    ) -> Result<R> {
        let url = format!("{}/models/{}:{}", self.base_url, model, action);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to call {action}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{action} returned {status}: {body}");
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {action} response"))
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate_content(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
        };
        let parsed: GenerateResponse = self
            .post(&self.generation_model, "generateContent", &request)
            .await?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(text)
    }

    async fn embed_content(&self, text: &str, dimensionality: usize) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: format!("models/{}", self.embedding_model),
            content: Content {
                parts: vec![Part {
                    text: Some(text.to_string()),
                }],
            },
            output_dimensionality: dimensionality,
        };
        let parsed: EmbeddingResponse = self
            .post(&self.embedding_model, "embedContent", &request)
            .await?;
        Ok(parsed.embedding.values)
    }
}
