//! Row-at-a-time record extraction on top of the `csv` reader.

use crate::{Record, RecordParseError, SourceReadError};
use std::io::Read;
use std::sync::Arc;

type BoxedReader<'a> = Box<dyn Read + Send + 'a>;

/// Lazy iterator over the rows of one pass.
///
/// Malformed rows surface as `Err` items and iteration continues; an I/O
/// failure ends the pass after being reported once.
pub struct Records<'a> {
    rows: csv::StringRecordsIntoIter<BoxedReader<'a>>,
    headers: Arc<[String]>,
    finished: bool,
}

impl std::fmt::Debug for Records<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Records")
            .field("headers", &self.headers)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Records<'_> {
    /// Field names declared by the header row.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

/// Starts a pass over delimited text, consuming the header row eagerly.
pub fn read_records<'a, R>(reader: R, delimiter: u8) -> Result<Records<'a>, SourceReadError>
where
    R: Read + Send + 'a,
{
    let boxed: BoxedReader<'a> = Box::new(reader);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(boxed);
    let headers: Arc<[String]> = reader
        .headers()
        .map_err(SourceReadError::Header)?
        .iter()
        .map(|name| name.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    Ok(Records {
        rows: reader.into_records(),
        headers,
        finished: false,
    })
}

impl Iterator for Records<'_> {
    type Item = Result<Record, RecordParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.rows.next()? {
            Ok(row) => {
                let line = row.position().map(|pos| pos.line()).unwrap_or(0);
                let values = row.iter().map(str::to_string).collect();
                Some(Ok(Record::new(line, Arc::clone(&self.headers), values)))
            }
            Err(err) => {
                let line = err.position().map(|pos| pos.line()).unwrap_or(0);
                let reason = match err.kind() {
                    csv::ErrorKind::UnequalLengths {
                        expected_len, len, ..
                    } => format!("expected {expected_len} fields, found {len}"),
                    csv::ErrorKind::Io(io) => {
                        self.finished = true;
                        format!("read failed: {io}")
                    }
                    _ => err.to_string(),
                };
                Some(Err(RecordParseError { line, reason }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_trimmed_headers() {
        let records = read_records("\u{feff}title , servings\n".as_bytes(), b',').unwrap();
        assert_eq!(records.headers(), ["title", "servings"]);
    }

    #[test]
    fn unequal_rows_name_expected_width() {
        let mut records = read_records("a,b\n1\n".as_bytes(), b',').unwrap();
        let err = records.next().unwrap().unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.reason, "expected 2 fields, found 1");
        assert!(records.next().is_none());
    }

    #[test]
    fn empty_input_yields_no_rows() {
        let mut records = read_records("".as_bytes(), b',').unwrap();
        assert!(records.headers().is_empty());
        assert!(records.next().is_none());
    }
}
