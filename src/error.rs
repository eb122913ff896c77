use thiserror::Error;

use crate::geometry::GeometryType;

/// Convenience result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Error type returned when a source or sheet cannot be ingested.
///
/// Row-level geometry problems are *not* reported here; they are collected as
/// [`crate::types::RowDiagnostic`]s and only escalate to [`IngestionError::Ungeometrizable`] when
/// no row of a geometric sheet could be resolved.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "excel")]
    /// Excel reading error (feature-gated behind `excel`).
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),

    /// CSV reading error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Parquet reading error.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON source could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The source yielded no columns or no data rows.
    #[error("empty source: {message}")]
    EmptySource { message: String },

    /// The input format could not be determined or is not enabled.
    #[error("unsupported format: {message}")]
    UnsupportedFormat { message: String },

    /// A geometry signal was detected but every row failed to normalize.
    #[error(
        "table '{table}' is ungeometrizable: all {failed_rows} rows failed {geometry} normalization (first failure: {first_failure})"
    )]
    Ungeometrizable {
        table: String,
        geometry: GeometryType,
        failed_rows: usize,
        first_failure: String,
    },

    /// The loader rejected a table or batch.
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// The run was cancelled between rows.
    #[error("ingestion cancelled after {rows} rows")]
    Cancelled { rows: usize },

    /// The normalization thread pool could not be started.
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Error raised while loading the geography catalog configuration.
///
/// These are startup-fatal: a catalog that fails to load must never serve requests.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Catalog file could not be read.
    #[error("cannot read geography catalog: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog file is not valid JSON or does not have the expected shape.
    #[error("malformed geography catalog: {0}")]
    Parse(#[from] serde_json::Error),

    /// A definition parsed but failed validation.
    #[error("invalid geography '{geography}': {message}")]
    Invalid { geography: String, message: String },
}

/// Classification of loader failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    /// The destination refused rows (unique/not-null/check constraints).
    ConstraintViolation,
    /// The destination refused the table or batch for another reason.
    Rejected,
    /// The destination could not be written.
    Io,
}

/// Structured failure returned by a [`crate::loader::Loader`].
#[derive(Debug, Clone, Error)]
#[error("{kind:?} on table '{table}': {message}")]
pub struct LoadError {
    pub table: String,
    pub kind: LoadErrorKind,
    pub message: String,
}

impl LoadError {
    pub fn new(table: impl Into<String>, kind: LoadErrorKind, message: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            kind,
            message: message.into(),
        }
    }
}
