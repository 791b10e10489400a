//! Caller-facing entry points tying ingestion and querying together.

use std::sync::Arc;

use recipe_source::RecordSource;

use crate::config::{IngestConfig, QueryConfig};
use crate::embedder::Embedder;
use crate::error::{ConfigError, PipelineError};
use crate::generator::Generator;
use crate::index::{SearchFilter, VectorIndex};
use crate::ingest::{IngestOutcome, IngestionController, ProgressHook, StopSignal};
use crate::query::QueryEngine;
use crate::recipe::EnrichedRecipe;

/// Recipe retrieval pipeline over one source, embedder and index.
pub struct RecipePipeline {
    source: Arc<dyn RecordSource>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    ingest: IngestConfig,
    query: QueryEngine,
    stop: StopSignal,
    progress: Option<ProgressHook>,
}

impl RecipePipeline {
    /// Wires the components together, validating both configurations.
    pub fn new(
        source: Arc<dyn RecordSource>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        generator: Option<Arc<dyn Generator>>,
        ingest: IngestConfig,
        query: QueryConfig,
    ) -> Result<Self, ConfigError> {
        ingest.validate()?;
        let query = QueryEngine::new(Arc::clone(&embedder), Arc::clone(&index), generator, query)?;
        Ok(Self {
            source,
            embedder,
            index,
            ingest,
            query,
            stop: StopSignal::new(),
            progress: None,
        })
    }

    /// Registers a callback invoked after each ingested batch.
    pub fn with_progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    /// Signal that cancels an in-flight `populate` between batches.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Ingests the source unless the index already holds data.
    pub async fn populate(&self) -> Result<IngestOutcome, PipelineError> {
        let mut controller = IngestionController::new(
            Arc::clone(&self.source),
            Arc::clone(&self.embedder),
            Arc::clone(&self.index),
            self.ingest.clone(),
        )?
        .with_stop_signal(self.stop.clone());
        if let Some(hook) = &self.progress {
            controller = controller.with_progress(Arc::clone(hook));
        }
        controller.run().await
    }

    /// Top-K enriched recipes for `query`.
    pub async fn search(
        &self,
        query: &str,
        filter: &SearchFilter,
    ) -> Result<Vec<EnrichedRecipe>, PipelineError> {
        self.query.search(query, filter).await
    }

    /// Single closest recipe.
    pub async fn best_match(&self, query: &str) -> Result<Option<EnrichedRecipe>, PipelineError> {
        self.query.best_match(query).await
    }

    /// Underlying query engine.
    pub fn query_engine(&self) -> &QueryEngine {
        &self.query
    }
}
