//! Text-to-vector embedding backends.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{ConfigError, EmbeddingServiceError};

mod gemini;

pub use gemini::GeminiEmbedder;

/// Retrieval role of the text being embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Text stored in the index.
    RetrievalDocument,
    /// Text used to search the index.
    RetrievalQuery,
}

/// Maps texts to fixed-length vectors.
///
/// Implementations return exactly one vector per input, in input order, and
/// do not retry on their own.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder produces.
    fn dimensions(&self) -> usize;

    /// Embeds `texts` for the given task.
    async fn embed(
        &self,
        texts: &[&str],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingServiceError>;
}

/// Embeds `texts` in requests of at most `batch_size`, preserving order.
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[&str],
    batch_size: usize,
    task: TaskType,
) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = embedder.embed(batch, task).await?;
        if embedded.len() != batch.len() {
            return Err(EmbeddingServiceError::InvalidResponse(format!(
                "received {} embeddings for {} inputs",
                embedded.len(),
                batch.len()
            )));
        }
        vectors.extend(embedded);
    }
    Ok(vectors)
}

/// Fails when any vector differs from the expected dimensionality.
pub fn check_dimensions(vectors: &[Vec<f32>], expected: usize) -> Result<(), ConfigError> {
    match vectors.iter().find(|vector| vector.len() != expected) {
        Some(vector) => Err(ConfigError::DimensionMismatch {
            expected,
            actual: vector.len(),
        }),
        None => Ok(()),
    }
}
