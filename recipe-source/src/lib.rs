//! Stream structured records out of delimited recipe exports.
//!
//! The header row names the fields; every following row becomes one [`Record`].
//! Sources are forward-only: a second pass means reopening the input through
//! [`RecordSource::open`].

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod stream;

pub use stream::{read_records, Records};

/// One parsed row, keyed by the header names of its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    line: u64,
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl Record {
    /// Builds a record from a shared header list and the row's values.
    ///
    /// `values` must have one entry per header; the stream enforces this before
    /// constructing records.
    pub fn new(line: u64, headers: Arc<[String]>, values: Vec<String>) -> Self {
        debug_assert_eq!(headers.len(), values.len());
        Self {
            line,
            headers,
            values,
        }
    }

    /// 1-based line in the source where the row started.
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Raw value for `field`, if the header declares it.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|name| name == field)
            .map(|idx| self.values[idx].as_str())
    }

    /// Field/value pairs in header order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    /// Number of fields in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the header declared no fields.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All values joined with single spaces, in header order.
    pub fn text(&self) -> String {
        self.values.join(" ")
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (field, value) in self.fields() {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}

/// The input could not be opened or its header could not be read.
#[derive(Debug, thiserror::Error)]
pub enum SourceReadError {
    /// Opening the file failed.
    #[error("failed to open record source {path:?}: {source}")]
    Open {
        /// Path that was requested.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The header row was missing or unreadable.
    #[error("failed to read header row: {0}")]
    Header(#[source] csv::Error),
}

/// A single row could not be turned into a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed row at line {line}: {reason}")]
pub struct RecordParseError {
    /// 1-based line of the offending row (0 when unknown).
    pub line: u64,
    /// Human-readable cause.
    pub reason: String,
}

/// Reopenable producer of records.
pub trait RecordSource: Send + Sync {
    /// Starts a fresh pass over the input from its first row.
    fn open(&self) -> Result<Records<'_>, SourceReadError>;

    /// Counts rows (well-formed and malformed) with a full pass.
    fn count(&self) -> Result<u64, SourceReadError> {
        Ok(self.open()?.count() as u64)
    }
}

/// Delimited file on disk.
#[derive(Debug, Clone)]
pub struct CsvRecordSource {
    path: PathBuf,
    delimiter: u8,
}

impl CsvRecordSource {
    /// Comma-delimited source at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
        }
    }

    /// Overrides the field delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Location of the input file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for CsvRecordSource {
    fn open(&self) -> Result<Records<'_>, SourceReadError> {
        let file = std::fs::File::open(&self.path).map_err(|source| SourceReadError::Open {
            path: self.path.clone(),
            source,
        })?;
        read_records(std::io::BufReader::new(file), self.delimiter)
    }
}

/// Delimited text held in memory; handy for fixtures and small corpora.
#[derive(Debug, Clone)]
pub struct InMemoryRecordSource {
    data: Arc<str>,
    delimiter: u8,
}

impl InMemoryRecordSource {
    /// Wraps comma-delimited text including its header row.
    pub fn new(data: impl Into<Arc<str>>) -> Self {
        Self {
            data: data.into(),
            delimiter: b',',
        }
    }

    /// Overrides the field delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

impl RecordSource for InMemoryRecordSource {
    fn open(&self) -> Result<Records<'_>, SourceReadError> {
        read_records(self.data.as_bytes(), self.delimiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const SAMPLE: &str = "title,ingredients,servings\n\
        Lentil Soup,\"lentils, onion, carrot\",4\n\
        Tofu Scramble,\"tofu, turmeric\",2\n";

    #[test]
    fn reads_rows_keyed_by_header() {
        let source = InMemoryRecordSource::new(SAMPLE);
        let records: Vec<Record> = source.open().unwrap().map(Result::unwrap).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("title"), Some("Lentil Soup"));
        assert_eq!(records[0].get("ingredients"), Some("lentils, onion, carrot"));
        assert_eq!(records[1].get("servings"), Some("2"));
        assert_eq!(records[1].get("missing"), None);
        assert_eq!(records[0].text(), "Lentil Soup lentils, onion, carrot 4");
    }

    #[test]
    fn reopening_restarts_from_first_row() {
        let source = InMemoryRecordSource::new(SAMPLE);
        assert_eq!(source.count().unwrap(), 2);
        let first = source.open().unwrap().next().unwrap().unwrap();
        assert_eq!(first.get("title"), Some("Lentil Soup"));
    }

    #[test]
    fn malformed_row_is_reported_and_stream_continues() {
        let source = InMemoryRecordSource::new(
            "title,servings\nGood,2\nBroken,2,extra\nAlso Good,3\n",
        );
        let items: Vec<_> = source.open().unwrap().collect();

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(
            items[2].as_ref().unwrap().get("title"),
            Some("Also Good")
        );
    }

    #[test]
    fn header_names_are_trimmed_and_blank_lines_skipped() {
        let source = InMemoryRecordSource::new(" title ; protein \nBowl;21\n\nWrap;9\n")
            .with_delimiter(b';');
        let records: Vec<Record> = source.open().unwrap().map(Result::unwrap).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("protein"), Some("9"));
    }

    #[test]
    fn missing_file_is_a_source_read_error() {
        let source = CsvRecordSource::new("/definitely/not/here.csv");
        let err = source.open().err().expect("open should fail");
        assert!(matches!(err, SourceReadError::Open { .. }));
    }

    #[test]
    fn reads_csv_files_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let source = CsvRecordSource::new(file.path());

        assert_eq!(source.count().unwrap(), 2);
        let json = serde_json::to_string(&source.open().unwrap().next().unwrap().unwrap())
            .unwrap();
        assert_eq!(
            json,
            r#"{"title":"Lentil Soup","ingredients":"lentils, onion, carrot","servings":"4"}"#
        );
    }
}
