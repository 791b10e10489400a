//! Brute-force in-process index.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{cosine_distance, IndexEntry, QueryResult, SearchFilter, VectorIndex};
use crate::error::{ConfigError, IndexError};

/// Linear-scan cosine index for tests and small corpora.
#[derive(Debug)]
pub struct MemoryIndex {
    dimensions: usize,
    entries: RwLock<Vec<IndexEntry>>,
}

impl MemoryIndex {
    /// Creates an empty index for vectors of `dimensions` length.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Copies the stored entries in insertion order.
    pub async fn entries(&self) -> Vec<IndexEntry> {
        self.entries.read().await.clone()
    }

    fn check(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimensions {
            return Err(ConfigError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn count(&self) -> Result<u64, IndexError> {
        Ok(self.entries.read().await.len() as u64)
    }

    async fn add(&self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        for entry in &entries {
            self.check(&entry.embedding)?;
        }
        self.entries.write().await.extend(entries);
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<QueryResult>, IndexError> {
        self.check(vector)?;
        filter.validate()?;
        let entries = self.entries.read().await;
        let mut scored: Vec<(f32, &IndexEntry)> = entries
            .iter()
            .filter(|entry| filter.matches(&entry.metadata))
            .map(|entry| (cosine_distance(vector, &entry.embedding), entry))
            .collect();
        // Stable sort keeps insertion order among equal distances.
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(scored
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(idx, (distance, entry))| QueryResult {
                rank: idx + 1,
                content: entry.content.clone(),
                metadata: entry.metadata.clone(),
                distance,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::Metadata;
    use serde_json::Value;

    fn entry(content: &str, embedding: Vec<f32>, protein: f64) -> IndexEntry {
        let mut metadata = Metadata::new();
        metadata.insert("protein".into(), Value::from(protein));
        IndexEntry {
            content: content.into(),
            embedding,
            metadata,
        }
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_distance() {
        let index = MemoryIndex::new(2);
        index
            .add(vec![
                entry("east", vec![1.0, 0.0], 5.0),
                entry("north", vec![0.0, 1.0], 25.0),
                entry("northeast", vec![1.0, 1.0], 30.0),
            ])
            .await
            .unwrap();

        let hits = index.search(&[0.0, 2.0], 2, &SearchFilter::none()).await.unwrap();
        let contents: Vec<_> = hits.iter().map(|hit| hit.content.as_str()).collect();
        assert_eq!(contents, ["north", "northeast"]);
        assert_eq!(hits[0].rank, 1);
        assert_eq!(index.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn search_applies_filter_before_limit() {
        let index = MemoryIndex::new(2);
        index
            .add(vec![
                entry("lean", vec![1.0, 0.0], 5.0),
                entry("hearty", vec![0.5, 0.5], 28.0),
            ])
            .await
            .unwrap();

        let filter = SearchFilter::none().at_least("protein", 20.0);
        let hits = index.search(&[1.0, 0.0], 1, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "hearty");
    }

    #[tokio::test]
    async fn rejects_wrong_dimensions() {
        let index = MemoryIndex::new(3);
        let err = index
            .add(vec![entry("short", vec![1.0], 0.0)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::Config(ConfigError::DimensionMismatch {
                expected: 3,
                actual: 1
            })
        ));
        assert_eq!(index.count().await.unwrap(), 0);
        assert!(index
            .search(&[0.0; 3], 5, &SearchFilter::none())
            .await
            .unwrap()
            .is_empty());
    }
}
