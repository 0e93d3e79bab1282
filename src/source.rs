//! Upstream record sources.
//!
//! A source streams batches of records from the beginning on every call; it
//! keeps no cursor. Resumption is the progress ledger's job.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::SourceError;

/// One record as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// Stable record identifier, the ledger key.
    pub id: String,
    /// Free-text collector field, if present and non-blank.
    pub collector: Option<String>,
}

impl SourceRecord {
    /// Creates a record.
    pub fn new(id: impl Into<String>, collector: Option<&str>) -> Self {
        Self {
            id: id.into(),
            collector: collector.map(str::trim).filter(|c| !c.is_empty()).map(str::to_string),
        }
    }
}

/// Lazily produced record batches.
pub type RecordBatches<'a> = Box<dyn Iterator<Item = Result<Vec<SourceRecord>, SourceError>> + Send + 'a>;

/// Restartable stream of records.
pub trait RecordSource: Send + Sync {
    /// Streams all records in batches of at most `batch_size`.
    fn stream_batches(&self, batch_size: usize) -> Result<RecordBatches<'_>, SourceError>;

    /// Number of records the stream will yield.
    fn total_count(&self) -> Result<u64, SourceError>;
}

/// In-memory source.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    records: Vec<SourceRecord>,
}

impl VecSource {
    /// Wraps `records`.
    #[must_use]
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self { records }
    }

    /// Builds records `r0`, `r1`, ... from collector strings.
    #[must_use]
    pub fn from_collectors<'a>(collectors: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(
            collectors
                .into_iter()
                .enumerate()
                .map(|(i, c)| SourceRecord::new(format!("r{i}"), Some(c)))
                .collect(),
        )
    }
}

impl RecordSource for VecSource {
    fn stream_batches(&self, batch_size: usize) -> Result<RecordBatches<'_>, SourceError> {
        Ok(Box::new(
            self.records
                .chunks(batch_size.max(1))
                .map(|chunk| Ok::<_, SourceError>(chunk.to_vec())),
        ))
    }

    fn total_count(&self) -> Result<u64, SourceError> {
        Ok(self.records.len() as u64)
    }
}

/// Field filter applied to JSON records, e.g. `kingdom=Plantae`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    field: String,
    value: String,
}

impl RecordFilter {
    /// Parses `field=value`.
    ///
    /// # Errors
    /// `Failed` when there is no `=` or the field name is empty.
    pub fn parse(expr: &str) -> Result<Self, SourceError> {
        match expr.split_once('=') {
            Some((field, value)) if !field.trim().is_empty() => Ok(Self {
                field: field.trim().to_string(),
                value: value.trim().to_string(),
            }),
            _ => Err(SourceError::Failed {
                message: format!("invalid filter '{expr}' (expected field=value)"),
            }),
        }
    }

    fn matches(&self, record: &Value) -> bool {
        match record.get(&self.field) {
            Some(Value::String(s)) => *s == self.value,
            Some(other) => other.to_string() == self.value,
            None => false,
        }
    }
}

/// Newline-delimited JSON file of occurrence records.
///
/// The collector is read from `collector`, falling back to `recordedBy`. The
/// id is read from `_id`, `id` or `occurrenceID`, falling back to the line
/// number.
#[derive(Debug, Clone)]
pub struct JsonLinesSource {
    path: PathBuf,
    filter: Option<RecordFilter>,
}

impl JsonLinesSource {
    /// Source over the file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            filter: None,
        }
    }

    /// Only yields records matching `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    fn lines(&self) -> Result<JsonLines, SourceError> {
        let file = File::open(&self.path)?;
        Ok(JsonLines {
            lines: BufReader::new(file).lines(),
            line: 0,
            filter: self.filter.clone(),
        })
    }
}

impl RecordSource for JsonLinesSource {
    fn stream_batches(&self, batch_size: usize) -> Result<RecordBatches<'_>, SourceError> {
        Ok(Box::new(Batches {
            records: self.lines()?,
            batch_size: batch_size.max(1),
            pending: None,
            done: false,
        }))
    }

    fn total_count(&self) -> Result<u64, SourceError> {
        let mut count = 0;
        for record in self.lines()? {
            record?;
            count += 1;
        }
        Ok(count)
    }
}

struct JsonLines {
    lines: Lines<BufReader<File>>,
    line: usize,
    filter: Option<RecordFilter>,
}

impl Iterator for JsonLines {
    type Item = Result<SourceRecord, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;
            if text.trim().is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(e) => {
                    return Some(Err(SourceError::Malformed {
                        line: self.line,
                        message: e.to_string(),
                    }))
                }
            };
            if self.filter.as_ref().is_some_and(|f| !f.matches(&value)) {
                continue;
            }
            return Some(Ok(to_record(&value, self.line)));
        }
    }
}

fn to_record(value: &Value, line: usize) -> SourceRecord {
    let id = ["_id", "id", "occurrenceID"]
        .iter()
        .find_map(|key| match value.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Object(o) => o.get("$oid").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .unwrap_or_else(|| format!("line:{line}"));
    let collector = ["collector", "recordedBy"]
        .iter()
        .filter_map(|key| value.get(key).and_then(Value::as_str))
        .find(|c| !c.trim().is_empty());
    SourceRecord::new(id, collector)
}

struct Batches {
    records: JsonLines,
    batch_size: usize,
    pending: Option<SourceError>,
    done: bool,
}

impl Iterator for Batches {
    type Item = Result<Vec<SourceRecord>, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending.take() {
            return Some(Err(e));
        }
        if self.done {
            return None;
        }
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.records.next() {
                Some(Ok(record)) => batch.push(record),
                Some(Err(e)) => {
                    // Records read before the failure are still delivered.
                    self.done = true;
                    if batch.is_empty() {
                        return Some(Err(e));
                    }
                    self.pending = Some(e);
                    break;
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        (!batch.is_empty()).then_some(Ok(batch))
    }
}
