//! Shared HTTP plumbing for the Gemini embedding and generation endpoints.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;

use crate::error::ConfigError;

/// Public Gemini API root.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Embedding model used for both stored chunks and queries.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
/// Generation model used for cost estimates.
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-pro";
/// Largest request `batchEmbedContents` accepts.
pub const MAX_EMBED_BATCH: usize = 100;

/// Connection settings for Gemini.
#[derive(Clone)]
pub struct GeminiConfig {
    /// API key sent as `x-goog-api-key`.
    pub api_key: String,
    /// API root, without a trailing slash.
    pub base_url: String,
    /// Embedding model name, with or without the `models/` prefix.
    pub embedding_model: String,
    /// Generation model name, with or without the `models/` prefix.
    pub generation_model: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Requested output dimensionality of embeddings.
    pub dimensions: usize,
    /// Texts per `batchEmbedContents` request.
    pub max_batch: usize,
}

impl GeminiConfig {
    /// Settings for the public endpoint with default models.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            timeout: Duration::from_secs(30),
            dimensions: crate::EMBEDDING_DIMENSIONS,
            max_batch: MAX_EMBED_BATCH,
        }
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("embedding_model", &self.embedding_model)
            .field("generation_model", &self.generation_model)
            .field("timeout", &self.timeout)
            .field("dimensions", &self.dimensions)
            .field("max_batch", &self.max_batch)
            .finish()
    }
}

/// Authenticated client shared by the embedder and generator.
#[derive(Clone, Debug)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
}

impl GeminiClient {
    /// Builds the HTTP client; the API key is required.
    pub fn new(config: &GeminiConfig) -> Result<Self, ConfigError> {
        if config.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("missing Gemini API key".into()));
        }
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(config.api_key.trim())
            .map_err(|_| ConfigError::Invalid("invalid Gemini API key".into()))?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| ConfigError::Invalid(format!("failed to build Gemini HTTP client: {err}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `{base}/models/{model}:{method}`.
    pub(crate) fn model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.base_url,
            model.trim().trim_start_matches("models/"),
            method
        )
    }

    pub(crate) async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.http.post(url).json(body).send().await
    }
}

/// Qualified model name as the API echoes it in request bodies.
pub(crate) fn qualified_model(model: &str) -> String {
    format!("models/{}", model.trim().trim_start_matches("models/"))
}
