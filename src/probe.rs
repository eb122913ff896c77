//! Schema prober: header normalization and bounded row sampling.

use crate::error::{IngestionError, IngestionResult};
use crate::ingestion::source::{RowStream, Sheet};
use crate::types::{ColumnSet, Value};

/// Number of data rows sampled per sheet unless configured otherwise.
pub const DEFAULT_SAMPLE_SIZE: usize = 10;

/// Ordered per-column samples taken from the first rows of a sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSamples {
    columns: Vec<Vec<Value>>,
}

impl ColumnSamples {
    fn from_rows(width: usize, rows: &[Vec<Value>]) -> Self {
        let columns = (0..width)
            .map(|i| rows.iter().map(|r| r.get(i).cloned().unwrap_or(Value::Null)).collect())
            .collect();
        Self { columns }
    }

    /// Sampled values of column `index`, in row order (nulls included).
    pub fn values(&self, index: usize) -> &[Value] {
        self.columns.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first_non_null(&self, index: usize) -> Option<&Value> {
        self.values(index).iter().find(|v| !v.is_null())
    }
}

/// A sheet whose header and first rows have been inspected.
///
/// The sampled rows are kept and replayed by [`ProbedSheet::into_rows`], so probing does not
/// consume any data.
pub struct ProbedSheet {
    pub name: String,
    pub columns: ColumnSet,
    pub samples: ColumnSamples,
    sampled_rows: Vec<Vec<Value>>,
    rest: RowStream,
}

impl ProbedSheet {
    /// Rows sampled during probing (already padded to the header width).
    pub fn sampled_rows(&self) -> &[Vec<Value>] {
        &self.sampled_rows
    }

    /// Every data row of the sheet, sampled rows first, each padded or truncated to the header
    /// width.
    pub fn into_rows(self) -> RowStream {
        let width = self.columns.len();
        let replay = self.sampled_rows.into_iter().map(Ok);
        let rest = self.rest.map(move |r| r.map(|row| fit_row(row, width)));
        Box::new(replay.chain(rest))
    }
}

impl std::fmt::Debug for ProbedSheet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbedSheet")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .field("sampled_rows", &self.sampled_rows.len())
            .finish()
    }
}

fn fit_row(mut row: Vec<Value>, width: usize) -> Vec<Value> {
    row.resize(width, Value::Null);
    row
}

/// Probe a sheet: normalize its header and buffer up to `sample_size` rows.
///
/// Fails with [`IngestionError::EmptySource`] when the header has no columns or the sheet has no
/// data rows. Read errors from the underlying source are returned as-is.
pub fn probe_sheet(sheet: Sheet, sample_size: usize) -> IngestionResult<ProbedSheet> {
    let Sheet {
        name,
        headers,
        mut rows,
    } = sheet;

    let width = headers.len();
    let mut sampled_rows = Vec::with_capacity(sample_size.max(1));
    // Always pull at least one row so an empty sheet is detected.
    while sampled_rows.len() < sample_size.max(1) {
        match rows.next() {
            Some(row) => sampled_rows.push(fit_row(row?, width)),
            None => break,
        }
    }

    let columns = ColumnSet::from_headers(&headers);
    if columns.is_empty() || columns.headers().all(str::is_empty) {
        return Err(IngestionError::EmptySource {
            message: format!("sheet '{name}' has no columns"),
        });
    }
    if sampled_rows.is_empty() {
        return Err(IngestionError::EmptySource {
            message: format!("sheet '{name}' has no data rows"),
        });
    }

    let samples = ColumnSamples::from_rows(width, &sampled_rows);
    Ok(ProbedSheet {
        name,
        columns,
        samples,
        sampled_rows,
        rest: rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::source::MemorySource;

    fn sheet(headers: &[&str], rows: Vec<Vec<Value>>) -> Sheet {
        MemorySource::single("t", headers, rows).into_sheet()
    }

    fn text(s: &str) -> Value {
        Value::Utf8(s.to_string())
    }

    #[test]
    fn probe_samples_bounded_rows_and_replays_everything() {
        let rows: Vec<Vec<Value>> = (0..5).map(|i| vec![Value::Int64(i)]).collect();
        let probed = probe_sheet(sheet(&["id"], rows), 2).unwrap();
        assert_eq!(probed.samples.values(0).len(), 2);
        let all: Vec<_> = probed.into_rows().collect::<Result<_, _>>().unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[4], vec![Value::Int64(4)]);
    }

    #[test]
    fn short_rows_are_padded_with_nulls() {
        let probed = probe_sheet(sheet(&["a", "b"], vec![vec![text("x")]]), 5).unwrap();
        assert_eq!(probed.sampled_rows()[0], vec![text("x"), Value::Null]);
        assert!(probed.samples.first_non_null(1).is_none());
    }

    #[test]
    fn empty_header_or_rows_is_an_empty_source() {
        let err = probe_sheet(sheet(&[], vec![vec![]]), 5).unwrap_err();
        assert!(err.to_string().contains("no columns"));
        let err = probe_sheet(sheet(&["a"], vec![]), 5).unwrap_err();
        assert!(err.to_string().contains("no data rows"));
    }
}
