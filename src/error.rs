//! Error taxonomy shared by the ingestion and query paths.
//!
//! Each variant of [`PipelineError`] carries its own recovery policy: source
//! failures abort a run, row failures skip a record, embedding and index-write
//! failures abandon a batch, and generation failures zero one result's costs.

pub use recipe_source::{RecordParseError, SourceReadError};

/// Invalid or inconsistent configuration. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Chunk windows must be non-empty and larger than their overlap.
    #[error("chunk overlap {overlap} must be smaller than chunk size {size}")]
    InvalidChunking {
        /// Requested window size in characters.
        size: usize,
        /// Requested overlap in characters.
        overlap: usize,
    },
    /// Embedder output does not match the dimensionality the index was built for.
    #[error("embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality declared by the index.
        expected: usize,
        /// Dimensionality produced or declared by the embedder.
        actual: usize,
    },
    /// A filter referenced a field name that cannot be addressed safely.
    #[error("invalid metadata field name '{0}'")]
    InvalidField(String),
    /// Any other rejected setting.
    #[error("{0}")]
    Invalid(String),
}

/// Failure talking to the embedding service.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingServiceError {
    /// Transport-level failure (timeout, connection reset, TLS).
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("embedding service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, if readable.
        body: String,
    },
    /// The response could not be interpreted.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    /// The service is unreachable or refused the work for another reason.
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),
}

/// Failure talking to the text generation service.
#[derive(Debug, thiserror::Error)]
pub enum GenerationServiceError {
    /// Transport-level failure.
    #[error("generation request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("generation service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, if readable.
        body: String,
    },
    /// The response carried no usable text.
    #[error("generation response missing text content")]
    EmptyResponse,
    /// The service is unreachable or refused the work for another reason.
    #[error("generation service unavailable: {0}")]
    Unavailable(String),
}

/// Failure inside a vector index implementation.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Establishing the connection failed.
    #[error("failed to connect to vector index: {0}")]
    Connect(#[source] tokio_postgres::Error),
    /// A statement failed.
    #[error("{context}: {source}")]
    Postgres {
        /// What the index was doing.
        context: String,
        /// Driver error.
        #[source]
        source: tokio_postgres::Error,
    },
    /// The index was asked to hold or compare data it was not configured for.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The index cannot serve requests for another reason.
    #[error("vector index unavailable: {0}")]
    Unavailable(String),
}

impl IndexError {
    pub(crate) fn postgres(context: impl Into<String>, source: tokio_postgres::Error) -> Self {
        Self::Postgres {
            context: context.into(),
            source,
        }
    }
}

/// Top-level error returned by pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The record source could not be opened. Fatal for an ingestion run.
    #[error(transparent)]
    SourceRead(#[from] SourceReadError),
    /// One row could not be parsed. Recoverable per record.
    #[error(transparent)]
    RecordParse(#[from] RecordParseError),
    /// The embedding service failed. Recoverable per batch.
    #[error(transparent)]
    EmbeddingService(#[from] EmbeddingServiceError),
    /// Persisting a batch failed. Recoverable per batch.
    #[error("index write failed: {0}")]
    IndexWrite(#[source] IndexError),
    /// Counting or searching the index failed.
    #[error("index read failed: {0}")]
    IndexRead(#[source] IndexError),
    /// The generation service failed. Recoverable per result.
    #[error(transparent)]
    GenerationService(#[from] GenerationServiceError),
    /// Configuration is invalid. Fatal.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Convenience alias for pipeline results.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
