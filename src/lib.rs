//! `geo-ingest` infers geometry for tabular uploads and streams the normalized rows to a loader.
//!
//! Given a file (or rows you already decoded) and a [`catalog::GeographyCatalog`], it works out
//! per sheet whether and how the columns describe geometry, converts every row into a canonical
//! EPSG:4326 geometry, and hands the records to a [`loader::Loader`].
//!
//! The primary entrypoint is [`ingestion::ingest_from_path`], which auto-detects the input format
//! from the file extension (or you can force one via [`ingestion::SourceOptions`]).
//!
//! ## What you can ingest
//!
//! **File formats (auto-detected by extension):**
//!
//! - **CSV**: `.csv`, `.tsv`
//! - **JSON**: `.json` (array-of-objects) and `.ndjson` (newline-delimited objects)
//! - **Parquet**: `.parquet`, `.pq`
//! - **Excel/workbooks** (requires the Cargo feature `excel`): `.xlsx`, `.xls`, `.xlsm`, `.xlsb`,
//!   `.ods`; every tab becomes its own table
//!
//! **Geometry signals**, tried in catalog rank order:
//!
//! - a latitude/longitude column pair (`lat`/`lon`, `latitude`/`longitude`, `y`/`x`, ...)
//! - a single WKT column, optionally `SRID=4326;`-prefixed
//! - a single WKB column, hex text or raw bytes (EWKB with SRID 4326 accepted)
//! - a single GeoJSON geometry column
//! - configured custom geographies (e.g. a `state` column), loaded plain with a join description
//!
//! Sheets with no signal load as plain tables. Rows whose geometry fails are kept with an empty
//! geometry and reported as [`types::RowDiagnostic`]s; a sheet where every row fails is reported
//! as an error and aborted on the loader.
//!
//! ## Quick example
//!
//! ```no_run
//! use geo_ingest::catalog::GeographyCatalog;
//! use geo_ingest::ingestion::{ingest_from_path, IngestOptions, SourceOptions};
//! use geo_ingest::loader::GeoJsonDirLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Built-in signals plus the configured geographies; invalid config fails here.
//! let catalog = GeographyCatalog::load("config/geographies.json")?;
//! let mut loader = GeoJsonDirLoader::new("out")?;
//! let reports = ingest_from_path(
//!     "stations.csv",
//!     &catalog,
//!     &mut loader,
//!     &SourceOptions::default(),
//!     &IngestOptions::default(),
//! )?;
//! // [{"status":"ok","table_name":"stations",...}]
//! println!("{}", serde_json::to_string(&reports)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## In-memory rows
//!
//! ```rust
//! use geo_ingest::catalog::GeographyCatalog;
//! use geo_ingest::ingestion::{load_source, IngestOptions, MemorySource};
//! use geo_ingest::loader::MemoryLoader;
//! use geo_ingest::types::Value;
//!
//! let source = MemorySource::single(
//!     "places",
//!     &["lat", "lon", "name"],
//!     vec![vec![
//!         Value::Utf8("45.5".to_string()),
//!         Value::Utf8("-122.6".to_string()),
//!         Value::Utf8("X".to_string()),
//!     ]],
//! );
//! let mut loader = MemoryLoader::new();
//! let reports = load_source(
//!     Box::new(source),
//!     &GeographyCatalog::builtin(),
//!     &mut loader,
//!     &IngestOptions::default(),
//! )
//! .unwrap();
//! assert!(reports[0].is_ok());
//!
//! // x is longitude, y is latitude
//! let record = &loader.table("places").unwrap().records[0];
//! let point = geo_types::Geometry::Point(geo_types::Point::new(-122.6, 45.5));
//! assert_eq!(record.geometry.as_ref().unwrap().geometry(), &point);
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: row sources, the per-sheet pipeline, and path-based entrypoints
//! - [`catalog`]: geography definitions loaded from configuration
//! - [`matcher`]: alias matching and rank ordering of geography definitions
//! - [`detect`]: geometry signal detectors over column names and samples
//! - [`normalize`]: per-row geometry decoding
//! - [`geometry`]: canonical geometry and geometry types
//! - [`loader`]: loader trait and the in-memory and GeoJSON loaders
//! - [`execution`]: chunked parallel normalization with metrics
//! - [`probe`]: header normalization and row sampling
//! - [`types`]: values, column sets, records
//! - [`error`]: error types

pub mod catalog;
pub mod detect;
pub mod error;
pub mod execution;
pub mod geometry;
pub mod ingestion;
pub mod loader;
pub mod matcher;
pub mod normalize;
pub mod probe;
pub mod types;

pub use error::{CatalogError, IngestionError, IngestionResult, LoadError, LoadErrorKind};
