//! Streaming ingestion: records to chunks to vectors to the index.
//!
//! A run checks whether the index already holds data, counts the source for
//! progress reporting, then streams records through a bounded
//! [`BatchBuffer`]. Each full buffer is chunked, embedded and stored before
//! the next is accumulated, so memory stays proportional to one batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use recipe_source::{Record, RecordSource};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::chunker::{Chunk, Chunker};
use crate::config::IngestConfig;
use crate::embedder::{check_dimensions, embed_in_batches, Embedder};
use crate::error::{ConfigError, IndexError, PipelineError};
use crate::index::{IndexEntry, VectorIndex};
use crate::recipe::metadata_for;

/// Lifecycle of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IngestState {
    /// Constructed, not yet run.
    NotStarted,
    /// First pass over the source.
    Counting,
    /// Accumulating records into the buffer.
    Streaming,
    /// Splitting a batch into chunks.
    Chunking,
    /// Waiting on the embedder.
    Embedding,
    /// Writing a batch to the index.
    Storing,
    /// Flushing the trailing partial batch.
    Draining,
    /// Finished, possibly after a cancellation.
    Done,
    /// Stopped by a fatal error.
    Aborted,
}

/// Result of a run that did not fail fatally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IngestOutcome {
    /// The index already held data; the source was not read.
    Skipped {
        /// Chunks already present.
        existing: u64,
    },
    /// The source was streamed.
    Completed(IngestReport),
}

/// Counters for a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Rows seen by the counting pass, malformed ones included.
    pub total_records: u64,
    /// Records whose chunks were stored.
    pub processed_records: u64,
    /// Malformed rows skipped.
    pub skipped_records: u64,
    /// Records lost with abandoned batches.
    pub abandoned_records: u64,
    /// Chunks written to the index.
    pub chunks_stored: u64,
    /// Set when the stop signal ended the run early.
    pub cancelled: bool,
    /// One entry per flushed batch.
    pub batches: Vec<BatchSummary>,
}

/// What happened to one flushed batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    /// 0-based flush number.
    pub index: usize,
    /// Records in the batch.
    pub records: usize,
    /// Chunks produced from those records.
    pub chunks: usize,
    /// Whether the batch drained the source.
    pub final_batch: bool,
    /// Error text when the batch was abandoned.
    pub abandoned: Option<String>,
}

/// Snapshot passed to the progress hook after each flush.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IngestProgress {
    /// 0-based flush number.
    pub batch: usize,
    /// Rows consumed so far.
    pub processed: u64,
    /// Rows reported by the counting pass.
    pub total: u64,
    /// `processed / total` as a percentage.
    pub percent: f64,
}

/// Callback invoked after every flushed batch.
pub type ProgressHook = Arc<dyn Fn(&IngestProgress) + Send + Sync>;

/// Cooperative cancellation flag checked between batches.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopState>,
}

#[derive(Debug, Default)]
struct StopState {
    raised: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    /// Fresh, unraised signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that the run stop after the current batch.
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether a stop was requested.
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Sleeps for `delay`, returning early if the signal is raised.
    pub async fn pause(&self, delay: Duration) {
        if delay.is_zero() || self.is_raised() {
            return;
        }
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_raised() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = notified => {}
        }
    }
}

/// Fixed-capacity accumulator flushed as a unit.
#[derive(Debug)]
pub struct BatchBuffer<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> BatchBuffer<T> {
    /// Empty buffer holding up to `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends one item.
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// True once the buffer reached capacity.
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Buffered item count.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Takes every buffered item, leaving the buffer empty.
    pub fn drain_and_clear(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.items, Vec::with_capacity(self.capacity))
    }
}

/// Drives one ingestion run.
pub struct IngestionController {
    source: Arc<dyn RecordSource>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    chunker: Chunker,
    config: IngestConfig,
    stop: StopSignal,
    progress: Option<ProgressHook>,
    state: IngestState,
}

impl IngestionController {
    /// Validates the configuration and that embedder and index agree on
    /// vector width.
    pub fn new(
        source: Arc<dyn RecordSource>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: IngestConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if embedder.dimensions() != index.dimensions() {
            return Err(ConfigError::DimensionMismatch {
                expected: index.dimensions(),
                actual: embedder.dimensions(),
            });
        }
        let chunker = Chunker::new(config.chunker)?;
        Ok(Self {
            source,
            embedder,
            index,
            chunker,
            config,
            stop: StopSignal::new(),
            progress: None,
            state: IngestState::NotStarted,
        })
    }

    /// Uses an externally owned stop signal.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Registers a callback run after each flushed batch.
    pub fn with_progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    /// Handle that cancels this run between batches.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> IngestState {
        self.state
    }

    /// Executes the run. Source and configuration failures are returned;
    /// row and batch failures are logged and counted in the report.
    pub async fn run(&mut self) -> Result<IngestOutcome, PipelineError> {
        if self.state != IngestState::NotStarted {
            return Err(ConfigError::Invalid("ingestion controller already ran".into()).into());
        }
        let result = self.execute().await;
        self.state = match result {
            Ok(_) => IngestState::Done,
            Err(_) => IngestState::Aborted,
        };
        result
    }

    async fn execute(&mut self) -> Result<IngestOutcome, PipelineError> {
        let existing = self.index.count().await.map_err(PipelineError::IndexRead)?;
        if existing > 0 {
            info!(existing, "index already populated, skipping ingestion");
            return Ok(IngestOutcome::Skipped { existing });
        }

        self.state = IngestState::Counting;
        let total = self.source.count()?;
        info!(total, "starting ingestion");

        self.state = IngestState::Streaming;
        let source = Arc::clone(&self.source);
        let mut records = source.open()?.peekable();
        let mut buffer = BatchBuffer::new(self.config.batch_size);
        let mut report = IngestReport {
            total_records: total,
            ..IngestReport::default()
        };
        let mut consumed = 0u64;

        while let Some(item) = records.next() {
            consumed += 1;
            match item {
                Ok(record) => buffer.push(record),
                Err(err) => {
                    warn!(line = err.line, reason = %err.reason, "skipping malformed record");
                    report.skipped_records += 1;
                }
            }
            if !buffer.is_full() {
                continue;
            }
            let exhausted = records.peek().is_none();
            self.flush(buffer.drain_and_clear(), consumed, exhausted, &mut report)
                .await?;
            if exhausted {
                break;
            }
            if self.stop.is_raised() {
                info!(processed = consumed, total, "stop requested, ending ingestion");
                report.cancelled = true;
                break;
            }
            self.state = IngestState::Streaming;
            self.stop.pause(self.config.batch_delay).await;
            if self.stop.is_raised() {
                info!(processed = consumed, total, "stop requested, ending ingestion");
                report.cancelled = true;
                break;
            }
        }

        if !buffer.is_empty() {
            self.state = IngestState::Draining;
            self.flush(buffer.drain_and_clear(), consumed, true, &mut report)
                .await?;
        }

        info!(
            processed = report.processed_records,
            skipped = report.skipped_records,
            abandoned = report.abandoned_records,
            chunks = report.chunks_stored,
            cancelled = report.cancelled,
            "database population complete"
        );
        Ok(IngestOutcome::Completed(report))
    }

    async fn flush(
        &mut self,
        records: Vec<Record>,
        consumed: u64,
        final_batch: bool,
        report: &mut IngestReport,
    ) -> Result<(), PipelineError> {
        let batch = report.batches.len();
        self.state = IngestState::Chunking;
        let chunks: Vec<Chunk> = records
            .iter()
            .flat_map(|record| {
                let metadata = Arc::new(metadata_for(record, &self.config.metadata));
                let text = record.text();
                self.chunker
                    .chunk_record(&text, metadata)
                    .collect::<Vec<_>>()
            })
            .collect();
        debug!(batch, records = records.len(), chunks = chunks.len(), "flushing batch");

        let abandoned = match self.store_with_retries(&chunks).await {
            Ok(()) => {
                report.processed_records += records.len() as u64;
                report.chunks_stored += chunks.len() as u64;
                None
            }
            Err(err @ PipelineError::Config(_)) => return Err(err),
            Err(err) => {
                warn!(batch, records = records.len(), error = %err, "abandoning batch");
                report.abandoned_records += records.len() as u64;
                Some(err.to_string())
            }
        };
        report.batches.push(BatchSummary {
            index: batch,
            records: records.len(),
            chunks: chunks.len(),
            final_batch,
            abandoned,
        });

        let total = report.total_records;
        let percent = if total == 0 {
            100.0
        } else {
            consumed as f64 / total as f64 * 100.0
        };
        let progress = IngestProgress {
            batch,
            processed: consumed,
            total,
            percent,
        };
        info!("Processed {}/{} ({:.2}%)", consumed, total, percent);
        if final_batch {
            info!(batch, "final batch processed");
        }
        if let Some(hook) = &self.progress {
            hook(&progress);
        }
        Ok(())
    }

    async fn store_with_retries(&mut self, chunks: &[Chunk]) -> Result<(), PipelineError> {
        let mut attempt = 0usize;
        loop {
            match self.store(chunks).await {
                Ok(()) => return Ok(()),
                Err(err @ PipelineError::Config(_)) => return Err(err),
                Err(err) if attempt < self.config.max_batch_retries => {
                    attempt += 1;
                    let wait = retry_backoff(attempt);
                    warn!(attempt, wait_ms = wait.as_millis() as u64, error = %err, "retrying batch");
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn store(&mut self, chunks: &[Chunk]) -> Result<(), PipelineError> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.state = IngestState::Embedding;
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        let vectors = embed_in_batches(
            self.embedder.as_ref(),
            &texts,
            self.config.embed_batch_size,
            self.config.document_task,
        )
        .await?;
        check_dimensions(&vectors, self.index.dimensions())?;

        self.state = IngestState::Storing;
        let entries = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry {
                content: chunk.text.clone(),
                embedding,
                metadata: chunk.metadata.as_ref().clone(),
            })
            .collect();
        self.index.add(entries).await.map_err(|err| match err {
            IndexError::Config(config) => PipelineError::Config(config),
            other => PipelineError::IndexWrite(other),
        })
    }
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{MemoryIndex, SearchFilter};
    use crate::recipe::Metadata;
    use crate::testing::KeywordEmbedder;
    use pretty_assertions::assert_eq;
    use recipe_source::{CsvRecordSource, InMemoryRecordSource};
    use std::sync::Mutex;

    const THREE_RECIPES: &str = "\
title,ingredients,instructions,servings,protein
Tofu Scramble,tofu; turmeric,Crumble and fry.,2,22
Beef Chili,beef; beans,Brown and simmer.,6,30
Lentil Soup,lentil; carrot,Boil until soft.,4,18
";

    fn config(batch_size: usize) -> IngestConfig {
        IngestConfig {
            batch_size,
            ..IngestConfig::default()
        }
        .without_delay()
    }

    fn controller(
        csv: &str,
        embedder: Arc<KeywordEmbedder>,
        index: Arc<MemoryIndex>,
        config: IngestConfig,
    ) -> IngestionController {
        IngestionController::new(
            Arc::new(InMemoryRecordSource::new(csv)),
            embedder,
            index,
            config,
        )
        .unwrap()
    }

    fn completed(outcome: IngestOutcome) -> IngestReport {
        match outcome {
            IngestOutcome::Completed(report) => report,
            other => panic!("expected completed run, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn streams_in_batches_and_reports_progress() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let index = Arc::new(MemoryIndex::new(embedder.dimensions()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut controller = controller(THREE_RECIPES, embedder.clone(), index.clone(), config(2))
            .with_progress(Arc::new(move |progress: &IngestProgress| {
                sink.lock().unwrap().push((progress.processed, progress.total));
            }));

        let report = completed(controller.run().await.unwrap());

        assert_eq!(controller.state(), IngestState::Done);
        assert_eq!(report.processed_records, 3);
        assert_eq!(report.chunks_stored, 3);
        let sizes: Vec<_> = report.batches.iter().map(|b| b.records).collect();
        assert_eq!(sizes, vec![2, 1]);
        assert!(report.batches[1].final_batch);
        assert_eq!(*seen.lock().unwrap(), vec![(2, 3), (3, 3)]);
        assert_eq!(index.count().await.unwrap(), 3);
        assert_eq!(embedder.calls(), 2);
    }

    #[tokio::test]
    async fn populated_index_is_left_alone() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let index = Arc::new(MemoryIndex::new(embedder.dimensions()));
        let entries = (0..10)
            .map(|i| IndexEntry {
                content: format!("existing {i}"),
                embedding: KeywordEmbedder::vector("rice"),
                metadata: Metadata::new(),
            })
            .collect();
        index.add(entries).await.unwrap();

        let mut controller = controller(THREE_RECIPES, embedder.clone(), index.clone(), config(2));
        let outcome = controller.run().await.unwrap();

        assert_eq!(outcome, IngestOutcome::Skipped { existing: 10 });
        assert_eq!(embedder.calls(), 0);
        assert_eq!(index.count().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let index = Arc::new(MemoryIndex::new(embedder.dimensions()));

        let first = controller(THREE_RECIPES, embedder.clone(), index.clone(), config(500))
            .run()
            .await
            .unwrap();
        assert_eq!(completed(first).chunks_stored, 3);
        let calls = embedder.calls();

        let second = controller(THREE_RECIPES, embedder.clone(), index.clone(), config(500))
            .run()
            .await
            .unwrap();
        assert_eq!(second, IngestOutcome::Skipped { existing: 3 });
        assert_eq!(embedder.calls(), calls);
        assert_eq!(index.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn malformed_row_skips_only_that_record() {
        let csv = "\
title,protein
Tofu Bowl,20
Broken,row,extra
Chicken Rice,35
";
        let embedder = Arc::new(KeywordEmbedder::default());
        let index = Arc::new(MemoryIndex::new(embedder.dimensions()));
        let report = completed(
            controller(csv, embedder, index.clone(), config(500))
                .run()
                .await
                .unwrap(),
        );

        assert_eq!(report.total_records, 3);
        assert_eq!(report.skipped_records, 1);
        assert_eq!(report.processed_records, 2);
        let stored: Vec<_> = index
            .entries()
            .await
            .into_iter()
            .map(|entry| entry.content)
            .collect();
        assert_eq!(stored, vec!["Tofu Bowl 20", "Chicken Rice 35"]);
    }

    #[tokio::test]
    async fn failed_batch_is_abandoned_and_run_continues() {
        let embedder = Arc::new(KeywordEmbedder::failing_on([1]));
        let index = Arc::new(MemoryIndex::new(embedder.dimensions()));
        let report = completed(
            controller(THREE_RECIPES, embedder, index.clone(), config(2))
                .run()
                .await
                .unwrap(),
        );

        assert_eq!(report.abandoned_records, 2);
        assert_eq!(report.processed_records, 1);
        assert!(report.batches[0].abandoned.is_some());
        assert_eq!(report.batches[1].abandoned, None);
        let stored = index.entries().await;
        assert_eq!(stored.len(), 1);
        assert!(stored[0].content.starts_with("Lentil Soup"));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_failed_batch_with_backoff() {
        let embedder = Arc::new(KeywordEmbedder::failing_on([1]));
        let index = Arc::new(MemoryIndex::new(embedder.dimensions()));
        let config = IngestConfig {
            max_batch_retries: 1,
            ..config(500)
        };
        let started = tokio::time::Instant::now();
        let report = completed(
            controller(THREE_RECIPES, embedder.clone(), index, config)
                .run()
                .await
                .unwrap(),
        );

        assert_eq!(report.processed_records, 3);
        assert_eq!(report.abandoned_records, 0);
        assert_eq!(embedder.calls(), 2);
        assert!(started.elapsed() >= retry_backoff(1));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_full_batches_only() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let index = Arc::new(MemoryIndex::new(embedder.dimensions()));
        let config = IngestConfig {
            batch_size: 2,
            ..IngestConfig::default()
        };
        let started = tokio::time::Instant::now();
        controller(THREE_RECIPES, embedder, index, config)
            .run()
            .await
            .unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn stop_signal_ends_run_after_current_batch() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let index = Arc::new(MemoryIndex::new(embedder.dimensions()));
        let stop = StopSignal::new();
        let trigger = stop.clone();
        let mut controller = controller(THREE_RECIPES, embedder, index.clone(), config(1))
            .with_stop_signal(stop)
            .with_progress(Arc::new(move |_: &IngestProgress| trigger.raise()));

        let report = completed(controller.run().await.unwrap());

        assert!(report.cancelled);
        assert_eq!(report.batches.len(), 1);
        assert_eq!(index.count().await.unwrap(), 1);
        assert_eq!(controller.state(), IngestState::Done);
    }

    #[tokio::test]
    async fn wrong_vector_width_aborts() {
        let embedder = Arc::new(KeywordEmbedder::truncating(3));
        let index = Arc::new(MemoryIndex::new(embedder.dimensions()));
        let mut controller = controller(THREE_RECIPES, embedder, index.clone(), config(2));

        let err = controller.run().await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::DimensionMismatch { actual: 3, .. })
        ));
        assert_eq!(controller.state(), IngestState::Aborted);
        assert_eq!(index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unreadable_source_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(KeywordEmbedder::default());
        let index = Arc::new(MemoryIndex::new(embedder.dimensions()));
        let mut controller = IngestionController::new(
            Arc::new(CsvRecordSource::new(dir.path().join("missing.csv"))),
            embedder.clone(),
            index,
            config(2),
        )
        .unwrap();

        let err = controller.run().await.unwrap_err();

        assert!(matches!(err, PipelineError::SourceRead(_)));
        assert_eq!(controller.state(), IngestState::Aborted);
        assert_eq!(embedder.calls(), 0);
    }

    #[test]
    fn rejects_mismatched_components() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let index = Arc::new(MemoryIndex::new(768));
        let err = IngestionController::new(
            Arc::new(InMemoryRecordSource::new(THREE_RECIPES)),
            embedder,
            index,
            IngestConfig::default(),
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            ConfigError::DimensionMismatch {
                expected: 768,
                actual: 9
            }
        );
    }

    #[test]
    fn buffer_drains_to_empty() {
        let mut buffer = BatchBuffer::new(2);
        buffer.push(1);
        assert!(!buffer.is_full());
        buffer.push(2);
        assert!(buffer.is_full());
        assert_eq!(buffer.drain_and_clear(), vec![1, 2]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
    }

    #[tokio::test]
    async fn stored_chunks_are_searchable_with_metadata() {
        let embedder = Arc::new(KeywordEmbedder::default());
        let index = Arc::new(MemoryIndex::new(embedder.dimensions()));
        controller(THREE_RECIPES, embedder, index.clone(), config(500))
            .run()
            .await
            .unwrap();

        let filter = SearchFilter::none().at_least("protein", 25.0);
        let hits = index
            .search(&KeywordEmbedder::vector("beef"), 5, &filter)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["title"], "Beef Chili");
    }
}
