//! Row sources and the ingestion pipeline.
//!
//! Most callers should use [`ingest_from_path`] (from [`unified`]) which:
//!
//! - opens a file as a [`RowSource`], auto-detecting the format by extension (or you can
//!   override via [`SourceOptions`])
//! - decides a geometry strategy for each sheet and streams normalized records to a
//!   [`crate::loader::Loader`]
//! - optionally reports success/failure/alerts to an [`IngestionObserver`]
//!
//! Callers that already hold decoded rows can wrap them in a [`MemorySource`] and call
//! [`load_source`], or drive a single sheet with [`ingest`].
//!
//! Format-specific sources are available under:
//! - [`csv`]
//! - [`json`]
//! - [`parquet`]
//! - `excel` (feature `excel`)

pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;
pub mod json;
pub mod observability;
pub mod parquet;
pub mod pipeline;
pub mod source;
pub mod unified;

pub use observability::{
    CompositeObserver, FileObserver, IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats,
    StdErrObserver,
};
pub use pipeline::{
    GeometryStrategy, IngestOptions, RecordStream, ReportStatus, SheetSummary, TableReport, clean_table_name,
    decide_strategy, ingest, load_source,
};
pub use source::{MemorySource, RowSource, RowStream, Sheet};
pub use unified::{ExcelSheetSelection, IngestionFormat, IngestionRequest, SourceOptions, ingest_from_path, open_path};
