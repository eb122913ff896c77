//! Row source abstraction.
//!
//! A [`RowSource`] yields one or more named [`Sheet`]s. Each sheet has a header row and a lazy
//! [`RowStream`]; rows are pulled on demand so large files are never fully buffered by the
//! pipeline.

use crate::error::IngestionResult;
use crate::types::Value;

/// Lazy sequence of rows aligned with a sheet's header.
pub type RowStream = Box<dyn Iterator<Item = IngestionResult<Vec<Value>>> + Send>;

/// One table-like unit of a source (a CSV file, a workbook tab, ...).
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: RowStream,
}

impl Sheet {
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: RowStream) -> Self {
        Self {
            name: name.into(),
            headers,
            rows,
        }
    }
}

impl std::fmt::Debug for Sheet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sheet")
            .field("name", &self.name)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// An already-opened, already-decoded tabular source.
pub trait RowSource: Send {
    /// Name used for the destination table of single-sheet sources (usually the file stem).
    fn name(&self) -> &str;

    /// Split the source into its sheets, in source order.
    fn into_sheets(self: Box<Self>) -> IngestionResult<Vec<Sheet>>;
}

/// Rows already held in memory, e.g. handed over by a caller that decoded them itself.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    sheets: Vec<(String, Vec<String>, Vec<Vec<Value>>)>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sheets: Vec::new(),
        }
    }

    /// A source with one sheet named like the source.
    pub fn single<S: AsRef<str>>(name: &str, headers: &[S], rows: Vec<Vec<Value>>) -> Self {
        Self::new(name).with_sheet(name, headers, rows)
    }

    pub fn with_sheet<S: AsRef<str>>(mut self, sheet: &str, headers: &[S], rows: Vec<Vec<Value>>) -> Self {
        let headers = headers.iter().map(|h| h.as_ref().to_string()).collect();
        self.sheets.push((sheet.to_string(), headers, rows));
        self
    }

    /// The first sheet, or an empty one when none was added.
    pub fn into_sheet(self) -> Sheet {
        let (name, headers, rows) = self
            .sheets
            .into_iter()
            .next()
            .unwrap_or_else(|| (self.name, Vec::new(), Vec::new()));
        Sheet::new(name, headers, Box::new(rows.into_iter().map(Ok)))
    }
}

impl RowSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn into_sheets(self: Box<Self>) -> IngestionResult<Vec<Sheet>> {
        Ok(self
            .sheets
            .into_iter()
            .map(|(name, headers, rows)| Sheet::new(name, headers, Box::new(rows.into_iter().map(Ok))))
            .collect())
    }
}
