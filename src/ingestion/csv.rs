//! CSV row source.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::IngestionResult;
use crate::types::Value;

use super::source::{RowSource, Sheet};

/// A CSV file (or reader) exposed as a single-sheet [`RowSource`].
///
/// Rules:
///
/// - The first record is the header row.
/// - Records may be shorter or longer than the header; they are padded/truncated downstream.
/// - Blank cells become [`Value::Null`]; everything else is kept as text.
pub struct CsvSource<R> {
    name: String,
    reader: csv::Reader<R>,
}

impl CsvSource<File> {
    /// Open a CSV file; the source is named after the file stem.
    pub fn from_path(path: impl AsRef<Path>, delimiter: u8) -> IngestionResult<Self> {
        let path = path.as_ref();
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(delimiter)
            .from_path(path)?;
        Ok(Self {
            name: super::unified::file_stem(path),
            reader,
        })
    }
}

impl<R: Read> CsvSource<R> {
    /// Wrap an existing CSV reader (headers must be enabled on it).
    pub fn from_reader(name: impl Into<String>, reader: csv::Reader<R>) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }
}

impl<R: Read + Send + 'static> RowSource for CsvSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn into_sheets(self: Box<Self>) -> IngestionResult<Vec<Sheet>> {
        let Self { name, mut reader } = *self;
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let rows = reader.into_records().map(|record| -> IngestionResult<Vec<Value>> {
            let record = record?;
            Ok(record.iter().map(Value::from_text).collect())
        });
        Ok(vec![Sheet::new(name, headers, Box::new(rows))])
    }
}
