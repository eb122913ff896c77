//! Loader sinks: where normalized records go.
//!
//! The pipeline drives a [`Loader`] through `begin_table` → `load_batch`* → `finish_table`, or
//! `abort_table` when the sheet fails midway. Loaders own the destination; the pipeline never
//! creates, drops, or indexes anything itself.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{LoadError, LoadErrorKind};
use crate::geometry::GeometryType;
use crate::types::{Record, Value};

/// Name of the geometry column declared for geometric tables.
pub const GEOMETRY_COLUMN: &str = "geom";

/// One join key of a map-service join: `LOWER(table.column) = LOWER(map.field)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinKey {
    /// Column of the uploaded table, as written in the source header.
    pub column: String,
    /// Logical field of the map table.
    pub map_field: String,
}

/// Join against a map table, used for custom geographies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinSpec {
    /// Map table named after the geography.
    pub map_table: String,
    pub keys: Vec<JoinKey>,
}

/// Geometry declared for a destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableGeometry {
    /// Plain table, no geometry column.
    None,
    /// Geometry column of a single declared type in [`crate::geometry::CANONICAL_SRID`].
    Typed {
        geometry_type: GeometryType,
        srid: u32,
        column: String,
    },
    /// Plain table whose geometry comes from a join with a map table.
    Join(JoinSpec),
}

/// Everything a loader needs to create a destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSpec {
    pub name: String,
    /// Attribute columns in record-value order (the decoded geometry column is not included).
    pub columns: Vec<String>,
    pub geometry: TableGeometry,
}

/// A destination for normalized records.
pub trait Loader {
    fn begin_table(&mut self, spec: &TableSpec) -> Result<(), LoadError>;

    fn load_batch(&mut self, table: &str, records: &[Record]) -> Result<(), LoadError>;

    fn finish_table(&mut self, table: &str) -> Result<(), LoadError>;

    /// Widen the geometry column of an open table to `geometry_type`.
    ///
    /// Called before the first batch holding a geometry the previous declaration does not
    /// accept. Records already loaded must be promoted to the new type (the new type always
    /// accepts them). Loaders whose output carries per-feature types can ignore it.
    fn widen_geometry(&mut self, _table: &str, _geometry_type: GeometryType) -> Result<(), LoadError> {
        Ok(())
    }

    /// Discard a partially loaded table. Must not fail; cleanup problems are the loader's own.
    fn abort_table(&mut self, table: &str);
}

impl<L: Loader + ?Sized> Loader for &mut L {
    fn begin_table(&mut self, spec: &TableSpec) -> Result<(), LoadError> {
        (**self).begin_table(spec)
    }

    fn load_batch(&mut self, table: &str, records: &[Record]) -> Result<(), LoadError> {
        (**self).load_batch(table, records)
    }

    fn finish_table(&mut self, table: &str) -> Result<(), LoadError> {
        (**self).finish_table(table)
    }

    fn widen_geometry(&mut self, table: &str, geometry_type: GeometryType) -> Result<(), LoadError> {
        (**self).widen_geometry(table, geometry_type)
    }

    fn abort_table(&mut self, table: &str) {
        (**self).abort_table(table)
    }
}

/// A table held by [`MemoryLoader`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedTable {
    pub spec: TableSpec,
    pub records: Vec<Record>,
    pub finished: bool,
}

/// Collects tables in memory. Starting a table that already exists replaces it.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    tables: Vec<LoadedTable>,
    aborted: Vec<String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&LoadedTable> {
        self.tables.iter().find(|t| t.spec.name == name)
    }

    /// Tables in the order they were begun.
    pub fn tables(&self) -> &[LoadedTable] {
        &self.tables
    }

    /// Names of aborted tables, in abort order.
    pub fn aborted(&self) -> &[String] {
        &self.aborted
    }

    fn open_mut(&mut self, table: &str) -> Result<&mut LoadedTable, LoadError> {
        self.tables
            .iter_mut()
            .find(|t| t.spec.name == table && !t.finished)
            .ok_or_else(|| LoadError::new(table, LoadErrorKind::Rejected, "table is not open"))
    }
}

impl Loader for MemoryLoader {
    fn begin_table(&mut self, spec: &TableSpec) -> Result<(), LoadError> {
        self.tables.retain(|t| t.spec.name != spec.name);
        self.tables.push(LoadedTable {
            spec: spec.clone(),
            records: Vec::new(),
            finished: false,
        });
        Ok(())
    }

    fn load_batch(&mut self, table: &str, records: &[Record]) -> Result<(), LoadError> {
        let open = self.open_mut(table)?;
        let width = open.spec.columns.len();
        if let Some(bad) = records.iter().find(|r| r.values.len() != width) {
            return Err(LoadError::new(
                table,
                LoadErrorKind::Rejected,
                format!("row {} has {} values, table has {width} columns", bad.row, bad.values.len()),
            ));
        }
        open.records.extend_from_slice(records);
        Ok(())
    }

    fn finish_table(&mut self, table: &str) -> Result<(), LoadError> {
        self.open_mut(table)?.finished = true;
        Ok(())
    }

    fn widen_geometry(&mut self, table: &str, geometry_type: GeometryType) -> Result<(), LoadError> {
        let open = self.open_mut(table)?;
        let TableGeometry::Typed { geometry_type: declared, .. } = &mut open.spec.geometry else {
            return Err(LoadError::new(table, LoadErrorKind::Rejected, "table has no geometry column"));
        };
        *declared = geometry_type;
        for record in &mut open.records {
            if let Some(g) = record.geometry.take() {
                let promoted = g.conform_to(geometry_type).map_err(|e| {
                    LoadError::new(table, LoadErrorKind::ConstraintViolation, format!("row {}: {e}", record.row))
                })?;
                record.geometry = Some(promoted);
            }
        }
        Ok(())
    }

    fn abort_table(&mut self, table: &str) {
        self.tables.retain(|t| t.spec.name != table);
        self.aborted.push(table.to_string());
    }
}

struct OpenCollection {
    path: PathBuf,
    columns: Vec<String>,
    writer: BufWriter<File>,
    features: usize,
}

/// Streams each table as a GeoJSON `FeatureCollection` file `<dir>/<table>.geojson`.
///
/// Features are written as batches arrive; nothing is buffered beyond the writer. Join tables
/// are written without geometry and carry the join description as a `join` foreign member of
/// the collection.
#[derive(Debug)]
pub struct GeoJsonDirLoader {
    dir: PathBuf,
    open: HashMap<String, OpenCollection>,
}

impl std::fmt::Debug for OpenCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenCollection")
            .field("path", &self.path)
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

impl GeoJsonDirLoader {
    /// Create the loader; `dir` is created if missing.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, LoadError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir.display().to_string(), e))?;
        Ok(Self {
            dir,
            open: HashMap::new(),
        })
    }

    /// Path of the file written for `table`.
    pub fn path_for(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.geojson"))
    }

    fn open_mut(&mut self, table: &str) -> Result<&mut OpenCollection, LoadError> {
        self.open
            .get_mut(table)
            .ok_or_else(|| LoadError::new(table, LoadErrorKind::Rejected, "table is not open"))
    }
}

impl Loader for GeoJsonDirLoader {
    fn begin_table(&mut self, spec: &TableSpec) -> Result<(), LoadError> {
        let path = self.path_for(&spec.name);
        let file = File::create(&path).map_err(|e| io_error(&spec.name, e))?;
        let mut writer = BufWriter::new(file);

        let name = serde_json::to_string(&spec.name).map_err(|e| json_error(&spec.name, e))?;
        write!(writer, "{{\"type\":\"FeatureCollection\",\"name\":{name},")
            .map_err(|e| io_error(&spec.name, e))?;
        if let TableGeometry::Join(join) = &spec.geometry {
            let join = serde_json::to_string(join).map_err(|e| json_error(&spec.name, e))?;
            write!(writer, "\"join\":{join},").map_err(|e| io_error(&spec.name, e))?;
        }
        writer
            .write_all(b"\"features\":[")
            .map_err(|e| io_error(&spec.name, e))?;

        self.open.insert(
            spec.name.clone(),
            OpenCollection {
                path,
                columns: spec.columns.clone(),
                writer,
                features: 0,
            },
        );
        Ok(())
    }

    fn load_batch(&mut self, table: &str, records: &[Record]) -> Result<(), LoadError> {
        let open = self.open_mut(table)?;
        for record in records {
            let properties: geojson::JsonObject = open
                .columns
                .iter()
                .cloned()
                .zip(record.values.iter().map(json_value))
                .collect();
            let feature = geojson::Feature {
                bbox: None,
                geometry: record
                    .geometry
                    .as_ref()
                    .map(|g| geojson::Geometry::new(geojson::Value::from(g.geometry()))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            };

            if open.features > 0 {
                open.writer.write_all(b",").map_err(|e| io_error(table, e))?;
            }
            serde_json::to_writer(&mut open.writer, &feature).map_err(|e| json_error(table, e))?;
            open.features += 1;
        }
        Ok(())
    }

    fn finish_table(&mut self, table: &str) -> Result<(), LoadError> {
        let mut open = self
            .open
            .remove(table)
            .ok_or_else(|| LoadError::new(table, LoadErrorKind::Rejected, "table is not open"))?;
        open.writer.write_all(b"]}").map_err(|e| io_error(table, e))?;
        open.writer.flush().map_err(|e| io_error(table, e))?;
        Ok(())
    }

    fn abort_table(&mut self, table: &str) {
        if let Some(open) = self.open.remove(table) {
            let path = open.path;
            drop(open.writer);
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("could not remove aborted table file {}: {e}", path.display());
            }
        }
    }
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Int64(v) => serde_json::Value::from(*v),
        Value::Float64(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Bool(v) => serde_json::Value::Bool(*v),
        Value::Utf8(s) => serde_json::Value::String(s.clone()),
        Value::Binary(bytes) => {
            serde_json::Value::String(bytes.iter().map(|b| format!("{b:02x}")).collect())
        }
    }
}

fn io_error(table: &str, e: std::io::Error) -> LoadError {
    LoadError::new(table, LoadErrorKind::Io, e.to_string())
}

fn json_error(table: &str, e: serde_json::Error) -> LoadError {
    LoadError::new(table, LoadErrorKind::Io, e.to_string())
}
