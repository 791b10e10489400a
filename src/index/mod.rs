//! Persistent stores of embedded chunks and their similarity search.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ConfigError, IndexError};
use crate::recipe::Metadata;

mod memory;
mod postgres;

pub use memory::MemoryIndex;
pub use postgres::{quote_ident, PgVectorConfig, PgVectorIndex, TableName};

/// One stored chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Chunk text.
    pub content: String,
    /// Chunk embedding.
    pub embedding: Vec<f32>,
    /// Metadata of the originating record.
    pub metadata: Metadata,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// 1-based position in the result list.
    pub rank: usize,
    /// Chunk text.
    pub content: String,
    /// Metadata of the originating record.
    pub metadata: Metadata,
    /// Cosine distance to the query (smaller is closer).
    pub distance: f32,
}

/// Direction of a numeric bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    /// Field value must be `>=` the threshold.
    AtLeast(f64),
    /// Field value must be `<=` the threshold.
    AtMost(f64),
}

impl Bound {
    fn admits(self, value: f64) -> bool {
        match self {
            Self::AtLeast(min) => value >= min,
            Self::AtMost(max) => value <= max,
        }
    }

    pub(crate) fn sql_operator(self) -> &'static str {
        match self {
            Self::AtLeast(_) => ">=",
            Self::AtMost(_) => "<=",
        }
    }

    pub(crate) fn threshold(self) -> f64 {
        match self {
            Self::AtLeast(value) | Self::AtMost(value) => value,
        }
    }
}

/// Numeric constraint on one metadata field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBound {
    /// Metadata key.
    pub field: String,
    /// Constraint applied to the field's numeric value.
    pub bound: Bound,
}

/// Conjunction of numeric bounds applied during search.
///
/// Fields that are missing or not stored as numbers compare as 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    bounds: Vec<FieldBound>,
}

impl SearchFilter {
    /// Filter that admits every chunk.
    pub fn none() -> Self {
        Self::default()
    }

    /// Requires `field >= value`.
    pub fn at_least(mut self, field: impl Into<String>, value: f64) -> Self {
        self.bounds.push(FieldBound {
            field: field.into(),
            bound: Bound::AtLeast(value),
        });
        self
    }

    /// Requires `field <= value`.
    pub fn at_most(mut self, field: impl Into<String>, value: f64) -> Self {
        self.bounds.push(FieldBound {
            field: field.into(),
            bound: Bound::AtMost(value),
        });
        self
    }

    /// True when no bounds are set.
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Configured bounds, in insertion order.
    pub fn bounds(&self) -> &[FieldBound] {
        &self.bounds
    }

    /// Field names must be plain identifiers and thresholds finite.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for FieldBound { field, bound } in &self.bounds {
            let valid = !field.is_empty()
                && field
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
            if !valid {
                return Err(ConfigError::InvalidField(field.clone()));
            }
            if !bound.threshold().is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "bound on '{field}' must be a finite number"
                )));
            }
        }
        Ok(())
    }

    /// Evaluates the filter against stored metadata.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.bounds.iter().all(|FieldBound { field, bound }| {
            let value = match metadata.get(field) {
                Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
                _ => 0.0,
            };
            bound.admits(value)
        })
    }
}

/// Store of embedded chunks with cosine similarity search.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Length of the vectors this index holds.
    fn dimensions(&self) -> usize;

    /// Number of stored chunks; 0 means ingestion has not run.
    async fn count(&self) -> Result<u64, IndexError>;

    /// Appends entries. Safe to call repeatedly with disjoint batches.
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    /// Returns up to `k` entries admitted by `filter`, closest first.
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<QueryResult>, IndexError>;
}

/// Cosine distance in `[0, 2]`; zero-norm vectors are treated as orthogonal.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}
