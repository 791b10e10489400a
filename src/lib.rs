#![warn(missing_docs)]
//! Streaming recipe ingestion into a vector index, and similarity search with
//! LLM cost estimates on top.

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod gemini;
pub mod generator;
pub mod index;
pub mod ingest;
pub mod pipeline;
pub mod query;
pub mod recipe;
#[cfg(test)]
mod testing;

pub use chunker::{Chunk, Chunker};
pub use config::{ChunkerConfig, IngestArgs, IngestConfig, PipelineArgs, QueryConfig};
pub use embedder::{Embedder, GeminiEmbedder, TaskType};
pub use error::{
    ConfigError, EmbeddingServiceError, GenerationServiceError, IndexError, PipelineError,
    RecordParseError, SourceReadError,
};
pub use gemini::{GeminiClient, GeminiConfig};
pub use generator::{GeminiGenerator, Generator};
pub use index::{
    IndexEntry, MemoryIndex, PgVectorConfig, PgVectorIndex, QueryResult, SearchFilter, TableName,
    VectorIndex,
};
pub use ingest::{
    BatchBuffer, IngestOutcome, IngestProgress, IngestReport, IngestState, IngestionController,
    ProgressHook, StopSignal,
};
pub use pipeline::RecipePipeline;
pub use query::QueryEngine;
pub use recipe::{EnrichedRecipe, NutritionInfo, RecipeMetadataConfig};
pub use recipe_source::{CsvRecordSource, InMemoryRecordSource, Record, RecordSource};

/// Width of `text-embedding-004` vectors.
pub const EMBEDDING_DIMENSIONS: usize = 768;

/// Installs a `tracing` subscriber honouring `RUST_LOG`, defaulting to `info`
/// for this crate and the calling binary.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
