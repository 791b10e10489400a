//! Pipeline tuning knobs and the command-line surface shared by binaries.

use std::time::Duration;

use clap::Args;

use crate::embedder::TaskType;
use crate::error::ConfigError;
use crate::gemini::GeminiConfig;
use crate::index::PgVectorConfig;
use crate::recipe::RecipeMetadataConfig;

/// Default number of records accumulated before a flush.
pub const DEFAULT_BATCH_SIZE: usize = 500;
/// Default pause between full batches.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_secs(1);
/// Default chunk window in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 2000;
/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 300;
/// Default number of texts sent per embedding request.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 100;
/// Default number of results returned by a search.
pub const DEFAULT_TOP_K: usize = 5;
/// Default number of concurrent cost estimates.
pub const DEFAULT_ENRICHMENT_CONCURRENCY: usize = 4;
/// Default capacity of the query-embedding cache.
pub const DEFAULT_EMBEDDING_CACHE: usize = 256;

/// Window parameters for the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared by adjacent chunks.
    pub chunk_overlap: usize,
}

impl ChunkerConfig {
    /// Builds a validated chunker configuration.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigError> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects empty windows and overlaps that would never advance.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunking {
                size: self.chunk_size,
                overlap: self.chunk_overlap,
            });
        }
        Ok(())
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Controls one ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    /// Records per flush.
    pub batch_size: usize,
    /// Pause after each full batch; the trailing partial batch never waits.
    pub batch_delay: Duration,
    /// Texts per embedding request.
    pub embed_batch_size: usize,
    /// Extra attempts for a failing flush before it is abandoned.
    pub max_batch_retries: usize,
    /// Chunk window parameters.
    pub chunker: ChunkerConfig,
    /// Which record columns get parsed into numbers.
    pub metadata: RecipeMetadataConfig,
    /// Task hint passed to the embedder for stored chunks.
    pub document_task: TaskType,
}

impl IngestConfig {
    /// Same configuration without inter-batch pauses.
    pub fn without_delay(mut self) -> Self {
        self.batch_delay = Duration::ZERO;
        self
    }

    /// Checks every knob, including the chunker's.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch size must be positive".into()));
        }
        if self.embed_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embedding batch size must be positive".into(),
            ));
        }
        self.chunker.validate()
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            max_batch_retries: 0,
            chunker: ChunkerConfig::default(),
            metadata: RecipeMetadataConfig::default(),
            document_task: TaskType::RetrievalDocument,
        }
    }
}

/// Controls retrieval and enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryConfig {
    /// Results returned by `search`.
    pub top_k: usize,
    /// Ask the generator for cost estimates.
    pub enrich: bool,
    /// Concurrent generator calls per query.
    pub enrichment_concurrency: usize,
    /// Cached query embeddings (0 disables the cache).
    pub embedding_cache: usize,
    /// Task hint passed to the embedder for query text.
    pub query_task: TaskType,
}

impl QueryConfig {
    /// Rejects zero-sized result sets and zero concurrency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top-k must be positive".into()));
        }
        if self.enrichment_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "enrichment concurrency must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            enrich: true,
            enrichment_concurrency: DEFAULT_ENRICHMENT_CONCURRENCY,
            embedding_cache: DEFAULT_EMBEDDING_CACHE,
            query_task: TaskType::RetrievalQuery,
        }
    }
}

/// Service and tuning arguments shared by the pipeline binaries.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Postgres connection string for the vector index
    #[arg(long, env = "RECIPE_RAG_DATABASE_URL")]
    pub database_url: String,

    /// Schema holding the embeddings table
    #[arg(long, env = "RECIPE_RAG_SCHEMA", default_value = "public")]
    pub schema: String,

    /// Embeddings table name
    #[arg(long, env = "RECIPE_RAG_TABLE", default_value = "recipes_embeddings")]
    pub table: String,

    /// Vector dimensionality of the index
    #[arg(long, env = "RECIPE_RAG_DIMENSIONS", default_value_t = crate::EMBEDDING_DIMENSIONS)]
    pub dimensions: usize,

    /// Gemini API key
    #[arg(long, env = "RECIPE_RAG_GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: String,

    /// Gemini API base URL
    #[arg(
        long,
        env = "RECIPE_RAG_GEMINI_BASE_URL",
        default_value = crate::gemini::DEFAULT_BASE_URL
    )]
    pub gemini_base_url: String,

    /// Embedding model name
    #[arg(
        long,
        env = "RECIPE_RAG_EMBEDDING_MODEL",
        default_value = crate::gemini::DEFAULT_EMBEDDING_MODEL
    )]
    pub embedding_model: String,

    /// Generation model used for cost estimates
    #[arg(
        long,
        env = "RECIPE_RAG_GENERATION_MODEL",
        default_value = crate::gemini::DEFAULT_GENERATION_MODEL
    )]
    pub generation_model: String,

    /// HTTP timeout for Gemini requests, in seconds
    #[arg(long, env = "RECIPE_RAG_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Texts per embedding request
    #[arg(long, env = "RECIPE_RAG_EMBED_BATCH", default_value_t = DEFAULT_EMBED_BATCH_SIZE)]
    pub embed_batch_size: usize,
}

impl PipelineArgs {
    /// Connection settings for the Gemini services.
    pub fn gemini_config(&self) -> GeminiConfig {
        GeminiConfig {
            api_key: self.gemini_api_key.clone(),
            base_url: self.gemini_base_url.clone(),
            embedding_model: self.embedding_model.clone(),
            generation_model: self.generation_model.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            dimensions: self.dimensions,
            max_batch: self.embed_batch_size.min(crate::gemini::MAX_EMBED_BATCH),
        }
    }

    /// Connection settings for the pgvector index.
    pub fn pgvector_config(&self) -> PgVectorConfig {
        PgVectorConfig {
            database_url: self.database_url.clone(),
            schema: self.schema.clone(),
            table: self.table.clone(),
            dimensions: self.dimensions,
        }
    }
}

/// Ingestion-only arguments.
#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Records per batch
    #[arg(long, env = "RECIPE_RAG_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Milliseconds to pause between full batches
    #[arg(long, env = "RECIPE_RAG_BATCH_DELAY_MS", default_value_t = 1000)]
    pub batch_delay_ms: u64,

    /// Maximum characters per chunk
    #[arg(long, env = "RECIPE_RAG_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Characters shared by adjacent chunks
    #[arg(long, env = "RECIPE_RAG_CHUNK_OVERLAP", default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,

    /// Extra attempts for a failing batch before it is abandoned
    #[arg(long, env = "RECIPE_RAG_BATCH_RETRIES", default_value_t = 0)]
    pub max_batch_retries: usize,

    /// Keep vitamin and mineral columns as raw text
    #[arg(long, env = "RECIPE_RAG_SKIP_MICRONUTRIENTS", default_value_t = false)]
    pub skip_micronutrients: bool,
}

impl IngestArgs {
    /// Converts the parsed arguments into a validated [`IngestConfig`].
    pub fn build_config(&self, embed_batch_size: usize) -> Result<IngestConfig, ConfigError> {
        let config = IngestConfig {
            batch_size: self.batch_size,
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            embed_batch_size,
            max_batch_retries: self.max_batch_retries,
            chunker: ChunkerConfig::new(self.chunk_size, self.chunk_overlap)?,
            metadata: RecipeMetadataConfig {
                parse_micronutrients: !self.skip_micronutrients,
            },
            document_task: TaskType::RetrievalDocument,
        };
        config.validate()?;
        Ok(config)
    }
}
