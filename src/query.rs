//! Similarity search with per-result cost enrichment.

use std::num::NonZeroUsize;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::QueryConfig;
use crate::embedder::{check_dimensions, Embedder};
use crate::error::{ConfigError, EmbeddingServiceError, IndexError, PipelineError};
use crate::generator::{cost_prompt, Generator};
use crate::index::{QueryResult, SearchFilter, VectorIndex};
use crate::recipe::{first_number, EnrichedRecipe};

/// Answers recipe queries against a populated index.
pub struct QueryEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    generator: Option<Arc<dyn Generator>>,
    config: QueryConfig,
    embedding_cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl QueryEngine {
    /// Builds an engine; `generator` may be omitted to skip cost estimates.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: Option<Arc<dyn Generator>>,
        config: QueryConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if embedder.dimensions() != index.dimensions() {
            return Err(ConfigError::DimensionMismatch {
                expected: index.dimensions(),
                actual: embedder.dimensions(),
            });
        }
        let embedding_cache = NonZeroUsize::new(config.embedding_cache)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));
        Ok(Self {
            embedder,
            index,
            generator,
            config,
            embedding_cache,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Top-K recipes for `text`, enriched when a generator is configured.
    pub async fn search(
        &self,
        text: &str,
        filter: &SearchFilter,
    ) -> Result<Vec<EnrichedRecipe>, PipelineError> {
        self.search_top(text, self.config.top_k, filter).await
    }

    /// Like [`search`](Self::search) with an explicit result count.
    pub async fn search_top(
        &self,
        text: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<EnrichedRecipe>, PipelineError> {
        let results = self.retrieve(text, k, filter).await?;
        Ok(self.enrich(results).await)
    }

    /// Single closest recipe, if any.
    pub async fn best_match(&self, text: &str) -> Result<Option<EnrichedRecipe>, PipelineError> {
        let mut results = self.search_top(text, 1, &SearchFilter::none()).await?;
        Ok(results.pop())
    }

    /// Raw similarity hits without enrichment.
    pub async fn retrieve(
        &self,
        text: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<QueryResult>, PipelineError> {
        filter.validate()?;
        let text = text.trim();
        if text.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embed_query(text).await?;
        let results = self
            .index
            .search(&vector, k, filter)
            .await
            .map_err(|err| match err {
                IndexError::Config(config) => PipelineError::Config(config),
                other => PipelineError::IndexRead(other),
            })?;
        debug!(hits = results.len(), k, "retrieved chunks");
        Ok(results)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        if let Some(cache) = &self.embedding_cache {
            if let Some(hit) = cache.lock().await.get(text).cloned() {
                return Ok(hit);
            }
        }

        let vector = self
            .embedder
            .embed(&[text], self.config.query_task)
            .await?
            .pop()
            .ok_or_else(|| {
                EmbeddingServiceError::InvalidResponse("no embedding returned for query".into())
            })?;
        check_dimensions(std::slice::from_ref(&vector), self.index.dimensions())?;

        if let Some(cache) = &self.embedding_cache {
            cache.lock().await.put(text.to_string(), vector.clone());
        }
        Ok(vector)
    }

    async fn enrich(&self, results: Vec<QueryResult>) -> Vec<EnrichedRecipe> {
        let generator = match &self.generator {
            Some(generator) if self.config.enrich => Arc::clone(generator),
            _ => return results.into_iter().map(EnrichedRecipe::from_result).collect(),
        };
        stream::iter(results)
            .map(|result| {
                let generator = Arc::clone(&generator);
                async move { estimate(generator.as_ref(), EnrichedRecipe::from_result(result)).await }
            })
            .buffered(self.config.enrichment_concurrency)
            .collect()
            .await
    }
}

async fn estimate(generator: &dyn Generator, mut recipe: EnrichedRecipe) -> EnrichedRecipe {
    let subject = if recipe.ingredients.trim().is_empty() {
        recipe.content.as_str()
    } else {
        recipe.ingredients.as_str()
    };
    match generator.generate(&cost_prompt(subject)).await {
        Ok(reply) => recipe.apply_cost_per_serving(first_number(&reply).unwrap_or(0.0)),
        Err(err) => warn!(title = %recipe.title, error = %err, "cost estimate unavailable"),
    }
    recipe
}
