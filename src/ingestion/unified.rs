//! Path-based entry point.
//!
//! Most callers should use [`ingest_from_path`], which opens a file as a [`RowSource`], infers
//! geometry for each of its sheets, and loads every sheet as its own table.
//!
//! - If [`SourceOptions::format`] is `None`, the format is inferred from the file extension.
//! - If an [`super::observability::IngestionObserver`] is set on [`IngestOptions`], per-table
//!   success/failure/alerts are reported to it, including failures to open the file.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::catalog::GeographyCatalog;
use crate::error::{IngestionError, IngestionResult};
use crate::loader::Loader;

use super::csv::CsvSource;
use super::json::JsonSource;
use super::observability::IngestionContext;
use super::parquet::ParquetSource;
use super::pipeline::{IngestOptions, TableReport, clean_table_name, load_source, report_failure};
use super::source::RowSource;

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionFormat {
    /// Comma-separated values (or another single-byte delimiter).
    Csv,
    /// JSON array-of-objects or NDJSON.
    Json,
    /// Apache Parquet.
    Parquet,
    /// Spreadsheet/workbook formats (feature-gated behind `excel`).
    Excel,
}

impl IngestionFormat {
    /// Parse an ingestion format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "tsv" | "txt" => Some(Self::Csv),
            "json" | "ndjson" | "jsonl" => Some(Self::Json),
            "parquet" | "pq" => Some(Self::Parquet),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Some(Self::Excel),
            _ => None,
        }
    }
}

/// How to choose sheet(s) when reading a workbook. Every selected tab becomes its own table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExcelSheetSelection {
    /// Only the first tab.
    First,
    /// A single named tab.
    Sheet(String),
    /// Every tab in workbook order (default).
    #[default]
    AllSheets,
    /// The listed tabs, in the given order.
    Sheets(Vec<String>),
}

/// Options controlling how a path is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOptions {
    /// If `None`, auto-detect format from file extension.
    pub format: Option<IngestionFormat>,
    /// Excel-specific options.
    pub excel_sheet_selection: ExcelSheetSelection,
    /// CSV delimiter; `.tsv` files default to tab when this is left at `b','`.
    pub csv_delimiter: u8,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            format: None,
            excel_sheet_selection: ExcelSheetSelection::default(),
            csv_delimiter: b',',
        }
    }
}

/// Open `path` as a row source.
pub fn open_path(path: impl AsRef<Path>, options: &SourceOptions) -> IngestionResult<Box<dyn RowSource>> {
    let path = path.as_ref();
    let fmt = match options.format {
        Some(f) => f,
        None => infer_format_from_path(path)?,
    };

    Ok(match fmt {
        IngestionFormat::Csv => {
            let is_tsv = path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("tsv"));
            let delimiter = if is_tsv && options.csv_delimiter == b',' {
                b'\t'
            } else {
                options.csv_delimiter
            };
            Box::new(CsvSource::from_path(path, delimiter)?)
        }
        IngestionFormat::Json => Box::new(JsonSource::from_path(path)?),
        IngestionFormat::Parquet => Box::new(ParquetSource::from_path(path)?),
        IngestionFormat::Excel => open_excel(path, &options.excel_sheet_selection)?,
    })
}

/// Ingest a file: open it, infer geometry per sheet, and load each sheet as a table.
///
/// Returns one [`TableReport`] per sheet. A file that cannot be opened at all is an `Err`
/// (and is reported to the observer).
///
/// # Examples
///
/// ## CSV with a latitude/longitude pair
///
/// ```no_run
/// use geo_ingest::catalog::GeographyCatalog;
/// use geo_ingest::ingestion::{ingest_from_path, IngestOptions, SourceOptions};
/// use geo_ingest::loader::MemoryLoader;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = GeographyCatalog::load("config/geographies.json")?;
/// let mut loader = MemoryLoader::new();
/// let reports = ingest_from_path(
///     "cities.csv",
///     &catalog,
///     &mut loader,
///     &SourceOptions::default(),
///     &IngestOptions::default(),
/// )?;
/// println!("{}", serde_json::to_string(&reports)?);
/// # Ok(())
/// # }
/// ```
///
/// ## Workbook tabs to GeoJSON files (feature `excel`)
///
/// ```no_run
/// use geo_ingest::catalog::GeographyCatalog;
/// use geo_ingest::ingestion::{ingest_from_path, ExcelSheetSelection, IngestOptions, SourceOptions};
/// use geo_ingest::loader::GeoJsonDirLoader;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = GeographyCatalog::builtin();
/// let mut loader = GeoJsonDirLoader::new("out")?;
/// let source = SourceOptions {
///     excel_sheet_selection: ExcelSheetSelection::Sheet("Stations".to_string()),
///     ..Default::default()
/// };
/// let reports = ingest_from_path("network.xlsx", &catalog, &mut loader, &source, &IngestOptions::default())?;
/// assert!(reports.iter().all(|r| r.is_ok()));
/// # Ok(())
/// # }
/// ```
pub fn ingest_from_path(
    path: impl AsRef<Path>,
    catalog: &GeographyCatalog,
    loader: &mut dyn Loader,
    source: &SourceOptions,
    options: &IngestOptions,
) -> IngestionResult<Vec<TableReport>> {
    let path = path.as_ref();
    match open_path(path, source) {
        Ok(row_source) => load_source(row_source, catalog, loader, options),
        Err(e) => {
            let stem = file_stem(path);
            let ctx = IngestionContext {
                table: clean_table_name(&stem),
                source: stem,
            };
            report_failure(options, &ctx, &e);
            Err(e)
        }
    }
}

/// File name without directory and extension.
pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn infer_format_from_path(path: &Path) -> IngestionResult<IngestionFormat> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| IngestionError::UnsupportedFormat {
            message: format!(
                "cannot infer format: path has no extension ({})",
                path.display()
            ),
        })?;

    IngestionFormat::from_extension(ext).ok_or_else(|| IngestionError::UnsupportedFormat {
        message: format!(
            "cannot infer format from extension '{ext}' for path ({})",
            path.display()
        ),
    })
}

fn open_excel(path: &Path, sel: &ExcelSheetSelection) -> IngestionResult<Box<dyn RowSource>> {
    // Avoid unused warnings when the feature is off.
    let _ = (path, sel);

    #[cfg(feature = "excel")]
    {
        Ok(Box::new(super::excel::ExcelSource::from_path(path, sel.clone())))
    }

    #[cfg(not(feature = "excel"))]
    {
        Err(IngestionError::UnsupportedFormat {
            message: "excel ingestion not enabled (enable cargo feature 'excel')".to_string(),
        })
    }
}

/// Owned ingestion request, e.g. for queuing uploads in a job system.
#[derive(Clone)]
pub struct IngestionRequest {
    /// Path to the input file.
    pub path: PathBuf,
    pub source: SourceOptions,
    pub options: IngestOptions,
}

impl fmt::Debug for IngestionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionRequest")
            .field("path", &self.path)
            .field("source", &self.source)
            .field("options", &self.options)
            .finish()
    }
}

impl IngestionRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            source: SourceOptions::default(),
            options: IngestOptions::default(),
        }
    }

    /// Execute the request by calling [`ingest_from_path`].
    pub fn run(&self, catalog: &GeographyCatalog, loader: &mut dyn Loader) -> IngestionResult<Vec<TableReport>> {
        ingest_from_path(&self.path, catalog, loader, &self.source, &self.options)
    }
}
