//! Character-window chunking with boundary-aware cut points.
//!
//! Windows are at most `chunk_size` characters. Each window ends at the
//! latest paragraph break, line break, sentence end, or whitespace that still
//! leaves more than `chunk_overlap` characters in the window, falling back to
//! a hard cut. The next window starts `chunk_overlap` characters before the
//! previous end, so neighbours share exactly that many characters.

use std::sync::Arc;

use serde::Serialize;

use crate::config::ChunkerConfig;
use crate::error::ConfigError;
use crate::recipe::Metadata;

/// Separator classes, highest priority first.
const BREAKS: &[&[&str]] = &[
    &["\n\n"],
    &["\n"],
    &[". ", "! ", "? "],
    &[" ", "\t"],
];

/// Embedding-ready slice of one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    /// Position of this chunk within its record.
    pub chunk_index: usize,
    /// Chunk text.
    pub text: String,
    /// Character offset where the chunk starts in the record text.
    pub char_start: usize,
    /// Character offset one past the chunk end.
    pub char_end: usize,
    /// Metadata of the originating record, shared by its chunks.
    #[serde(skip)]
    pub metadata: Arc<Metadata>,
}

/// Bounds of one window, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Inclusive start.
    pub start: usize,
    /// Exclusive end.
    pub end: usize,
}

/// Stateless splitter configured once per ingestion run.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Builds a chunker, rejecting windows that could not make progress.
    pub fn new(config: ChunkerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the window parameters.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Lazily yields the windows covering `text`.
    pub fn windows<'a>(&self, text: &'a str) -> Windows<'a> {
        let mut offsets: Vec<usize> = text.char_indices().map(|(idx, _)| idx).collect();
        offsets.push(text.len());
        Windows {
            text,
            offsets,
            start: 0,
            size: self.config.chunk_size,
            overlap: self.config.chunk_overlap,
            done: text.trim().is_empty(),
        }
    }

    /// Splits one record's text into chunks carrying its metadata.
    pub fn chunk_record<'a>(
        &self,
        text: &'a str,
        metadata: Arc<Metadata>,
    ) -> impl Iterator<Item = Chunk> + 'a {
        let windows = self.windows(text);
        windows
            .enumerate()
            .map(move |(chunk_index, (window, slice))| Chunk {
                chunk_index,
                text: slice.to_string(),
                char_start: window.start,
                char_end: window.end,
                metadata: Arc::clone(&metadata),
            })
    }
}

/// Iterator returned by [`Chunker::windows`].
#[derive(Debug)]
pub struct Windows<'a> {
    text: &'a str,
    /// Byte offset of every char, plus the text length.
    offsets: Vec<usize>,
    start: usize,
    size: usize,
    overlap: usize,
    done: bool,
}

impl<'a> Windows<'a> {
    fn char_len(&self) -> usize {
        self.offsets.len() - 1
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.offsets[start]..self.offsets[end]]
    }

    /// Latest break in `(start + overlap, hard_end]`, or `hard_end`.
    fn cut_point(&self, start: usize, hard_end: usize) -> usize {
        let floor = start + self.overlap;
        let base = self.offsets[start];
        let haystack = self.slice(start, hard_end);
        for class in BREAKS {
            let best = class
                .iter()
                .filter_map(|sep| haystack.rfind(sep).map(|idx| base + idx + sep.len()))
                .filter_map(|byte| self.offsets.binary_search(&byte).ok())
                .filter(|&end| end > floor)
                .max();
            if let Some(end) = best {
                return end;
            }
        }
        hard_end
    }
}

impl<'a> Iterator for Windows<'a> {
    type Item = (Window, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let total = self.char_len();
        let start = self.start;
        let hard_end = start + self.size;
        let end = if hard_end >= total {
            total
        } else {
            self.cut_point(start, hard_end)
        };

        if end >= total {
            self.done = true;
        } else {
            self.start = end - self.overlap;
        }
        Some((Window { start, end }, self.slice(start, end)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkerConfig::new(size, overlap).unwrap()).unwrap()
    }

    fn char_slice(text: &str, start: usize, end: usize) -> String {
        text.chars().skip(start).take(end - start).collect()
    }

    fn assert_covers(text: &str, chunker: &Chunker) {
        let windows: Vec<_> = chunker.windows(text).collect();
        let overlap = chunker.config().chunk_overlap;
        let size = chunker.config().chunk_size;

        assert_eq!(windows.first().unwrap().0.start, 0);
        assert_eq!(windows.last().unwrap().0.end, text.chars().count());
        for (window, slice) in &windows {
            assert!(window.end - window.start <= size);
            assert_eq!(*slice, char_slice(text, window.start, window.end));
        }
        for pair in windows.windows(2) {
            let (prev, next) = (pair[0].0, pair[1].0);
            assert_eq!(prev.end - next.start, overlap);
            assert!(next.start > prev.start);
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks: Vec<_> = chunker(2000, 300)
            .chunk_record("Lentil soup with cumin.", Arc::new(Metadata::new()))
            .collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Lentil soup with cumin.");
        assert_eq!((chunks[0].char_start, chunks[0].char_end), (0, 23));
    }

    #[test]
    fn blank_text_yields_nothing() {
        let chunker = chunker(10, 2);
        assert_eq!(chunker.windows("").count(), 0);
        assert_eq!(chunker.windows(" \n\t ").count(), 0);
    }

    #[test]
    fn prefers_paragraph_then_sentence_breaks() {
        let text = "Soak the beans.\n\nSimmer them slowly. Season well and serve hot.";
        let windows: Vec<_> = chunker(30, 5).windows(text).map(|(_, s)| s).collect();
        assert_eq!(windows[0], "Soak the beans.\n\n");
        assert!(windows[1].ends_with(". "));
        assert_covers(text, &chunker(30, 5));
    }

    #[test]
    fn hard_cut_without_boundaries() {
        let text = "x".repeat(25);
        let windows: Vec<_> = chunker(10, 3).windows(&text).map(|(w, _)| w).collect();
        assert_eq!(
            windows,
            vec![
                Window { start: 0, end: 10 },
                Window { start: 7, end: 17 },
                Window { start: 14, end: 24 },
                Window { start: 21, end: 25 },
            ]
        );
    }

    #[test]
    fn covers_text_with_exact_overlap() {
        let text = "Dice the onion, mince the garlic and warm the oil. ".repeat(120);
        assert_covers(&text, &chunker(2000, 300));
        assert_covers(&text, &chunker(64, 16));
        assert_covers(&text, &chunker(7, 1));
    }

    #[test]
    fn never_splits_multibyte_chars() {
        let text = "Crème brûlée. Jalapeño piñata café! ".repeat(40);
        let chunker = chunker(33, 9);
        assert_covers(&text, &chunker);
        for (window, slice) in chunker.windows(&text) {
            assert_eq!(slice.chars().count(), window.end - window.start);
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "Whisk eggs.\nFold in flour.\n\nBake 20 minutes. ".repeat(50);
        let metadata = Arc::new(Metadata::new());
        let first: Vec<_> = chunker(120, 30)
            .chunk_record(&text, Arc::clone(&metadata))
            .collect();
        let second: Vec<_> = chunker(120, 30).chunk_record(&text, metadata).collect();
        assert_eq!(first, second);
        assert!(first.iter().enumerate().all(|(idx, c)| c.chunk_index == idx));
    }
}
