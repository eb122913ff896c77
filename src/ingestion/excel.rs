#![cfg(feature = "excel")]

//! Spreadsheet row source (`.xlsx`, `.xls`, `.ods`, ...).

use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Range, Reader};

use crate::error::{IngestionError, IngestionResult};
use crate::types::Value;

use super::source::{RowSource, RowStream, Sheet};
use super::unified::ExcelSheetSelection;

/// A workbook exposed as one [`Sheet`] per selected tab.
///
/// Behavior:
/// - Each tab is its own sheet, named after the tab; tabs never share a destination table
/// - The first non-empty row of a tab is its header row
/// - A tab that cannot be read yields its error from its own row stream, so the other tabs
///   are still processed
pub struct ExcelSource {
    name: String,
    path: PathBuf,
    selection: ExcelSheetSelection,
}

impl ExcelSource {
    /// The workbook is opened when the sheets are requested.
    pub fn from_path(path: impl AsRef<Path>, selection: ExcelSheetSelection) -> Self {
        let path = path.as_ref();
        Self {
            name: super::unified::file_stem(path),
            path: path.to_path_buf(),
            selection,
        }
    }
}

impl RowSource for ExcelSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn into_sheets(self: Box<Self>) -> IngestionResult<Vec<Sheet>> {
        let Self { path, selection, .. } = *self;
        let mut workbook = open_workbook_auto(&path)?;

        let tabs: Vec<String> = match selection {
            ExcelSheetSelection::First => workbook.sheet_names().into_iter().take(1).collect(),
            ExcelSheetSelection::Sheet(name) => vec![name],
            ExcelSheetSelection::AllSheets => workbook.sheet_names().to_vec(),
            ExcelSheetSelection::Sheets(names) => names,
        };
        if tabs.is_empty() {
            return Err(IngestionError::EmptySource {
                message: "workbook has no sheets".to_string(),
            });
        }

        Ok(tabs
            .into_iter()
            .map(|tab| match workbook.worksheet_range(&tab) {
                Ok(range) => sheet_from_range(tab, range),
                Err(e) => {
                    let err: IngestionError = e.into();
                    let rows: RowStream = Box::new(std::iter::once(Err(err)));
                    Sheet::new(tab, Vec::new(), rows)
                }
            })
            .collect())
    }
}

fn sheet_from_range(tab: String, range: Range<Data>) -> Sheet {
    let header_idx = range
        .rows()
        .position(|row| row.iter().any(|c| !matches!(c, Data::Empty)));
    let Some(header_idx) = header_idx else {
        return Sheet::new(tab, Vec::new(), Box::new(std::iter::empty()));
    };

    let rows: Vec<Vec<Data>> = range.rows().map(<[Data]>::to_vec).collect();
    let headers: Vec<String> = rows[header_idx].iter().map(cell_to_header_string).collect();
    let data = rows
        .into_iter()
        .skip(header_idx + 1)
        .map(|row| Ok(row.iter().map(convert_cell).collect()));
    Sheet::new(tab, headers, Box::new(data))
}

fn cell_to_header_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 => (*f as i64).to_string(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn convert_cell(c: &Data) -> Value {
    match c {
        Data::Empty => Value::Null,
        Data::String(s) => Value::from_text(s),
        Data::Int(i) => Value::Int64(*i),
        Data::Float(f) => Value::Float64(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::from_text(s),
        Data::Error(_) => Value::Null,
        other => Value::Utf8(other.to_string()),
    }
}
