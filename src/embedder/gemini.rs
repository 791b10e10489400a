//! Gemini `batchEmbedContents` client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, TaskType};
use crate::error::{ConfigError, EmbeddingServiceError};
use crate::gemini::{qualified_model, GeminiClient, GeminiConfig, MAX_EMBED_BATCH};

/// Embedder backed by a Gemini embedding model.
#[derive(Clone, Debug)]
pub struct GeminiEmbedder {
    client: GeminiClient,
    endpoint: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
}

impl GeminiEmbedder {
    /// Builds an embedder over a shared client.
    pub fn new(client: GeminiClient, config: &GeminiConfig) -> Result<Self, ConfigError> {
        if config.embedding_model.trim().is_empty() {
            return Err(ConfigError::Invalid("missing Gemini embedding model".into()));
        }
        if config.dimensions == 0 {
            return Err(ConfigError::Invalid("embedding dimensions must be positive".into()));
        }
        let endpoint = client.model_url(&config.embedding_model, "batchEmbedContents");
        Ok(Self {
            client,
            endpoint,
            model: qualified_model(&config.embedding_model),
            dimensions: config.dimensions,
            batch_size: config.max_batch.clamp(1, MAX_EMBED_BATCH),
        })
    }

    /// Texts sent per request.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_request(
        &self,
        inputs: &[&str],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        let request = BatchEmbedRequest {
            requests: inputs
                .iter()
                .map(|&text| EmbedContentRequest {
                    model: &self.model,
                    content: Content {
                        parts: [Part { text }],
                    },
                    task_type: task,
                    output_dimensionality: self.dimensions,
                })
                .collect(),
        };
        let resp = self.client.post(&self.endpoint, &request).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbeddingServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: BatchEmbedResponse = resp.json().await?;
        if parsed.embeddings.len() != inputs.len() {
            return Err(EmbeddingServiceError::InvalidResponse(format!(
                "Gemini returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                inputs.len()
            )));
        }
        Ok(parsed
            .embeddings
            .into_iter()
            .map(|entry| entry.values)
            .collect())
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(
        &self,
        texts: &[&str],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(inputs = batch.len(), ?task, "requesting embeddings");
            vectors.extend(self.embed_request(batch, task).await?);
        }
        Ok(vectors)
    }
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: TaskType,
    output_dimensionality: usize,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_gemini_field_names() {
        let request = BatchEmbedRequest {
            requests: vec![EmbedContentRequest {
                model: "models/text-embedding-004",
                content: Content {
                    parts: [Part { text: "lentil stew" }],
                },
                task_type: TaskType::RetrievalDocument,
                output_dimensionality: 768,
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "requests": [{
                    "model": "models/text-embedding-004",
                    "content": {"parts": [{"text": "lentil stew"}]},
                    "taskType": "RETRIEVAL_DOCUMENT",
                    "outputDimensionality": 768
                }]
            })
        );
    }

    #[test]
    fn batch_size_is_capped_by_service_limit() {
        let mut config = GeminiConfig::new("key");
        config.max_batch = 500;
        let client = GeminiClient::new(&config).unwrap();
        let embedder = GeminiEmbedder::new(client, &config).unwrap();
        assert_eq!(embedder.batch_size(), MAX_EMBED_BATCH);
        assert_eq!(embedder.dimensions(), 768);
    }
}
