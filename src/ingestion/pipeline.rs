//! Ingestion orchestrator.
//!
//! Per sheet: probe → match/detect → decide one [`GeometryStrategy`] → normalize rows in chunks
//! → stream [`Record`]s to a [`Loader`]. The strategy is decided once per sheet and rows are never
//! re-detected. The declared geometry type comes from the sample and is widened, never enforced,
//! when a later row does not fit it.

use std::collections::{HashSet, VecDeque};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use serde::Serialize;

use crate::catalog::{GeographyCatalog, GeographyKind};
use crate::detect::{self, Detection, WellKnownEncoding};
use crate::error::{IngestionError, IngestionResult, LoadErrorKind};
use crate::execution::{ExecutionObserver, ExecutionOptions, NormalizationEngine};
use crate::geometry::{CANONICAL_SRID, GeometryType};
use crate::loader::{GEOMETRY_COLUMN, JoinKey, JoinSpec, Loader, TableGeometry, TableSpec};
use crate::matcher::{GeographyMatch, rank_matches};
use crate::normalize::{GeometrySignal, RowGeometry, normalize_row};
use crate::probe::{DEFAULT_SAMPLE_SIZE, ProbedSheet, probe_sheet};
use crate::types::{Record, RowDiagnostic, Value};

use super::observability::{IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats};
use super::source::{RowSource, RowStream, Sheet};

/// How geometry is produced for every row of a sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryStrategy {
    /// No geometry signal; rows pass through as plain tabular data.
    Plain,
    /// Geometry is decoded from the sheet's own columns.
    Geometric {
        signal: GeometrySignal,
        /// Declared type of the destination geometry column.
        declared: GeometryType,
        /// Name of the geography definition that selected the signal.
        geography: String,
    },
    /// Rows are loaded plain and joined against a map table.
    Join(JoinSpec),
}

impl GeometryStrategy {
    pub fn signal(&self) -> Option<&GeometrySignal> {
        match self {
            Self::Geometric { signal, .. } => Some(signal),
            _ => None,
        }
    }

    pub fn declared(&self) -> Option<GeometryType> {
        match self {
            Self::Geometric { declared, .. } => Some(*declared),
            _ => None,
        }
    }

    pub fn geography(&self) -> Option<&str> {
        match self {
            Self::Geometric { geography, .. } => Some(geography),
            Self::Join(join) => Some(&join.map_table),
            Self::Plain => None,
        }
    }
}

/// Options controlling sheet ingestion.
///
/// Use [`Default`] for common cases.
#[derive(Clone)]
pub struct IngestOptions {
    /// Rows sampled per sheet for detection and type declaration.
    pub sample_size: usize,
    /// Load rows whose geometry failed (with geometry absent) instead of dropping them.
    pub keep_failed_rows: bool,
    /// Upper bound on row diagnostics stored per sheet; counts stay exact.
    pub max_diagnostics: usize,
    /// Thread pool and chunking for normalization.
    pub execution: ExecutionOptions,
    /// Optional observer for chunk progress.
    pub execution_observer: Option<Arc<dyn ExecutionObserver>>,
    /// Optional observer for table outcomes and row diagnostics.
    pub observer: Option<Arc<dyn IngestionObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: IngestionSeverity,
    /// Set to `true` to stop between rows; the current table fails with
    /// [`IngestionError::Cancelled`].
    pub cancel: Option<Arc<AtomicBool>>,
}

impl fmt::Debug for IngestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestOptions")
            .field("sample_size", &self.sample_size)
            .field("keep_failed_rows", &self.keep_failed_rows)
            .field("max_diagnostics", &self.max_diagnostics)
            .field("execution", &self.execution)
            .field("execution_observer_set", &self.execution_observer.is_some())
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            keep_failed_rows: true,
            max_diagnostics: 1_000,
            execution: ExecutionOptions::default(),
            execution_observer: None,
            observer: None,
            alert_at_or_above: IngestionSeverity::Critical,
            cancel: None,
        }
    }
}

impl IngestOptions {
    /// Build the normalization engine described by these options.
    pub fn engine(&self) -> IngestionResult<NormalizationEngine> {
        let engine = NormalizationEngine::new(self.execution.clone())?;
        Ok(match &self.execution_observer {
            Some(obs) => engine.with_observer(Arc::clone(obs)),
            None => engine,
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Clean a sheet or file name into a destination table name.
///
/// Spaces, dashes and colons become `_`, dots are removed, and the result is lower-cased.
pub fn clean_table_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != '.')
        .map(|c| match c {
            ' ' | '-' | ':' => '_',
            other => other,
        })
        .flat_map(char::to_lowercase)
        .collect()
}

/// Decide the geometry strategy of a probed sheet.
///
/// Candidates are tried in rank order (highest rank first, ties by declaration order). A
/// candidate whose detector finds no usable column is skipped; one whose column matched but
/// whose sample is invalid is still chosen, so its rows fail with diagnostics instead of being
/// silently loaded as plain data.
pub fn decide_strategy(catalog: &GeographyCatalog, probed: &ProbedSheet) -> GeometryStrategy {
    for candidate in rank_matches(catalog, &probed.columns) {
        if let Some(strategy) = strategy_for(catalog, probed, &candidate) {
            debug!(
                "sheet '{}': geography '{}' (rank {}) selected",
                probed.name, candidate.definition.name, candidate.definition.rank
            );
            return strategy;
        }
        debug!(
            "sheet '{}': geography '{}' matched by name but its detector found no usable column",
            probed.name, candidate.definition.name
        );
    }
    debug!("sheet '{}': no geography match, loading as plain data", probed.name);
    GeometryStrategy::Plain
}

fn strategy_for(
    catalog: &GeographyCatalog,
    probed: &ProbedSheet,
    candidate: &GeographyMatch,
) -> Option<GeometryStrategy> {
    let definition = candidate.definition.as_ref();
    let columns = &probed.columns;
    let samples = &probed.samples;

    let signal = match definition.kind {
        GeographyKind::Custom => {
            return Some(GeometryStrategy::Join(JoinSpec {
                map_table: definition.name.clone(),
                keys: candidate
                    .field_to_column
                    .iter()
                    .map(|(field, column)| JoinKey {
                        column: column.name.clone(),
                        map_field: field.clone(),
                    })
                    .collect(),
            }));
        }
        GeographyKind::Coordinates => GeometrySignal::Point(detect::coordinate_pair(columns, definition)?),
        GeographyKind::Wkt | GeographyKind::Wkb => {
            let (wkt, wkb) = if definition.kind == GeographyKind::Wkt {
                (Some(definition), catalog.signal(GeographyKind::Wkb).map(|d| d.as_ref()))
            } else {
                (catalog.signal(GeographyKind::Wkt).map(|d| d.as_ref()), Some(definition))
            };
            match detect::well_known(columns, samples, wkt, wkb) {
                Detection::NoMatch => return None,
                Detection::Matched(found) => match found.encoding {
                    WellKnownEncoding::Text => GeometrySignal::Wkt(found.column),
                    WellKnownEncoding::Binary => GeometrySignal::Wkb(found.column),
                },
                Detection::InvalidContent { column, reason } => {
                    warn!(
                        "sheet '{}': column '{}' is named like {} but {reason}; rows will fail",
                        probed.name, column.name, definition.name
                    );
                    if definition.kind == GeographyKind::Wkt {
                        GeometrySignal::Wkt(column)
                    } else {
                        GeometrySignal::Wkb(column)
                    }
                }
            }
        }
        GeographyKind::GeoJson => match detect::geojson(columns, samples, definition) {
            Detection::NoMatch => return None,
            Detection::Matched(column) => GeometrySignal::GeoJson(column),
            Detection::InvalidContent { column, reason } => {
                warn!(
                    "sheet '{}': column '{}' is named like GeoJSON but {reason}; rows will fail",
                    probed.name, column.name
                );
                GeometrySignal::GeoJson(column)
            }
        },
    };

    let declared = declared_type(&signal, probed.sampled_rows());
    Some(GeometryStrategy::Geometric {
        signal,
        declared,
        geography: definition.name.clone(),
    })
}

/// `Point` for coordinate pairs, otherwise the unified type of the sampled geometries that
/// resolved (`Geometry` when none did).
fn declared_type(signal: &GeometrySignal, sampled: &[Vec<Value>]) -> GeometryType {
    if matches!(signal, GeometrySignal::Point(_)) {
        return GeometryType::Point;
    }
    sampled
        .iter()
        .filter_map(|row| match normalize_row(Some(signal), row) {
            RowGeometry::Resolved(g) => Some(g.geometry_type()),
            _ => None,
        })
        .reduce(GeometryType::unify)
        .unwrap_or(GeometryType::Geometry)
}

fn table_spec(table: &str, probed: &ProbedSheet, strategy: &GeometryStrategy) -> TableSpec {
    let dropped = strategy.signal().and_then(GeometrySignal::encoded_column).map(|c| c.index);
    let columns = probed
        .columns
        .headers()
        .enumerate()
        .filter(|(i, _)| Some(*i) != dropped)
        .map(|(_, h)| h.to_string())
        .collect();
    let geometry = match strategy {
        GeometryStrategy::Plain => TableGeometry::None,
        GeometryStrategy::Geometric { declared, .. } => TableGeometry::Typed {
            geometry_type: *declared,
            srid: CANONICAL_SRID,
            column: GEOMETRY_COLUMN.to_string(),
        },
        GeometryStrategy::Join(join) => TableGeometry::Join(join.clone()),
    };
    TableSpec {
        name: table.to_string(),
        columns,
        geometry,
    }
}

/// Outcome of a sheet whose record stream ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetSummary {
    pub table: String,
    pub strategy: GeometryStrategy,
    /// Data rows read from the source.
    pub rows_read: usize,
    /// Records emitted (rows read minus dropped failures).
    pub rows_loaded: usize,
    pub resolved: usize,
    pub failed: usize,
    /// Stored diagnostics, capped at [`IngestOptions::max_diagnostics`].
    pub diagnostics: Vec<RowDiagnostic>,
}

/// Lazy stream of normalized records for one sheet.
///
/// Rows are pulled from the source one chunk at a time and normalized on the engine. Row-level
/// failures are collected as diagnostics; call [`RecordStream::finish`] at the end to get the
/// summary, or [`IngestionError::Ungeometrizable`] when no row of a geometric sheet resolved.
pub struct RecordStream<'e> {
    spec: TableSpec,
    strategy: GeometryStrategy,
    rows: RowStream,
    engine: &'e NormalizationEngine,
    options: IngestOptions,
    context: IngestionContext,
    buffer: VecDeque<Record>,
    done: bool,
    rows_read: usize,
    rows_loaded: usize,
    resolved: usize,
    failed: usize,
    first_failure: Option<String>,
    diagnostics: Vec<RowDiagnostic>,
}

impl fmt::Debug for RecordStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStream")
            .field("spec", &self.spec)
            .field("strategy", &self.strategy)
            .field("rows_read", &self.rows_read)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<'e> RecordStream<'e> {
    fn new(
        table: &str,
        probed: ProbedSheet,
        strategy: GeometryStrategy,
        engine: &'e NormalizationEngine,
        options: &IngestOptions,
        context: IngestionContext,
    ) -> Self {
        let spec = table_spec(table, &probed, &strategy);
        Self {
            spec,
            strategy,
            rows: probed.into_rows(),
            engine,
            options: options.clone(),
            context,
            buffer: VecDeque::new(),
            done: false,
            rows_read: 0,
            rows_loaded: 0,
            resolved: 0,
            failed: 0,
            first_failure: None,
            diagnostics: Vec::new(),
        }
    }

    /// Destination table description handed to the loader.
    pub fn table_spec(&self) -> &TableSpec {
        &self.spec
    }

    pub fn strategy(&self) -> &GeometryStrategy {
        &self.strategy
    }

    /// Diagnostics collected so far.
    pub fn diagnostics(&self) -> &[RowDiagnostic] {
        &self.diagnostics
    }

    /// Next batch of records (at most one engine chunk), or `None` at the end of the sheet.
    pub fn next_batch(&mut self) -> Option<IngestionResult<Vec<Record>>> {
        if !self.buffer.is_empty() {
            return Some(Ok(self.buffer.drain(..).collect()));
        }
        self.next_chunk()
    }

    /// Drain the remaining rows and summarize the sheet.
    ///
    /// Records not yet consumed are normalized and counted but discarded.
    pub fn finish(mut self) -> IngestionResult<SheetSummary> {
        while let Some(batch) = self.next_chunk() {
            batch?;
        }

        if self.strategy.signal().is_some() && self.rows_read > 0 && self.resolved == 0 {
            return Err(IngestionError::Ungeometrizable {
                table: self.spec.name,
                geometry: self.strategy.declared().unwrap_or(GeometryType::Geometry),
                failed_rows: self.failed,
                first_failure: self.first_failure.unwrap_or_default(),
            });
        }

        Ok(SheetSummary {
            table: self.spec.name,
            strategy: self.strategy,
            rows_read: self.rows_read,
            rows_loaded: self.rows_loaded,
            resolved: self.resolved,
            failed: self.failed,
            diagnostics: self.diagnostics,
        })
    }

    fn next_chunk(&mut self) -> Option<IngestionResult<Vec<Record>>> {
        if self.done {
            return None;
        }

        let start_row = self.rows_read + 1;
        let mut chunk: Vec<Vec<Value>> = Vec::with_capacity(self.engine.chunk_size());
        while chunk.len() < self.engine.chunk_size() {
            if self.options.is_cancelled() {
                self.done = true;
                return Some(Err(IngestionError::Cancelled {
                    rows: self.rows_read,
                }));
            }
            match self.rows.next() {
                Some(Ok(row)) => {
                    chunk.push(row);
                    self.rows_read += 1;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if chunk.is_empty() {
            return None;
        }

        let geometries = self.engine.normalize_chunk(start_row, &chunk, self.strategy.signal());
        self.widen_for(&geometries);
        let declared = self.strategy.declared().unwrap_or(GeometryType::Geometry);
        let dropped = self
            .strategy
            .signal()
            .and_then(GeometrySignal::encoded_column)
            .map(|c| c.index);

        let mut records = Vec::with_capacity(chunk.len());
        for (offset, (mut values, geometry)) in chunk.into_iter().zip(geometries).enumerate() {
            let row = start_row + offset;
            let geometry = match geometry.conform(declared) {
                RowGeometry::Resolved(g) => {
                    self.resolved += 1;
                    Some(g)
                }
                RowGeometry::Failed(reason) => {
                    self.record_failure(RowDiagnostic { row, reason });
                    if !self.options.keep_failed_rows {
                        continue;
                    }
                    None
                }
                RowGeometry::NoSignal => None,
            };
            if let Some(idx) = dropped {
                if idx < values.len() {
                    values.remove(idx);
                }
            }
            records.push(Record { row, values, geometry });
        }
        self.rows_loaded += records.len();
        Some(Ok(records))
    }

    /// Widen the declared type so every resolved geometry of the chunk fits it.
    fn widen_for(&mut self, geometries: &[RowGeometry]) {
        let GeometryStrategy::Geometric { declared, .. } = &mut self.strategy else {
            return;
        };
        let before = *declared;
        let widened = geometries
            .iter()
            .filter_map(|g| match g {
                RowGeometry::Resolved(g) => Some(g.geometry_type()),
                _ => None,
            })
            .fold(before, GeometryType::widen);
        if widened == before {
            return;
        }
        warn!(
            "table '{}': geometry column widened from {before} to {widened}",
            self.spec.name
        );
        *declared = widened;
        if let TableGeometry::Typed { geometry_type, .. } = &mut self.spec.geometry {
            *geometry_type = widened;
        }
    }

    fn record_failure(&mut self, diagnostic: RowDiagnostic) {
        self.failed += 1;
        if self.first_failure.is_none() {
            self.first_failure = Some(diagnostic.to_string());
        }
        if self.diagnostics.len() < self.options.max_diagnostics {
            if let Some(obs) = &self.options.observer {
                obs.on_diagnostic(&self.context, &diagnostic);
            }
            self.diagnostics.push(diagnostic);
        }
    }
}

impl Iterator for RecordStream<'_> {
    type Item = IngestionResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            match self.next_chunk()? {
                Ok(records) => self.buffer.extend(records),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Probe one sheet, decide its strategy, and return its record stream.
///
/// The destination table is named after the sheet via [`clean_table_name`].
pub fn ingest<'e>(
    sheet: Sheet,
    catalog: &GeographyCatalog,
    engine: &'e NormalizationEngine,
    options: &IngestOptions,
) -> IngestionResult<RecordStream<'e>> {
    let context = IngestionContext {
        source: sheet.name.clone(),
        table: clean_table_name(&sheet.name),
    };
    ingest_in_context(sheet, catalog, engine, options, context)
}

fn ingest_in_context<'e>(
    sheet: Sheet,
    catalog: &GeographyCatalog,
    engine: &'e NormalizationEngine,
    options: &IngestOptions,
    context: IngestionContext,
) -> IngestionResult<RecordStream<'e>> {
    if options.is_cancelled() {
        return Err(IngestionError::Cancelled { rows: 0 });
    }
    let probed = probe_sheet(sheet, options.sample_size)?;
    let strategy = decide_strategy(catalog, &probed);
    let table = context.table.clone();
    Ok(RecordStream::new(&table, probed, strategy, engine, options, context))
}

/// Table outcome status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Ok,
    Error,
}

/// Per-table outcome, serialized as `{"status": "ok"|"error", "table_name", "reason"?, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableReport {
    pub status: ReportStatus,
    pub table_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geography: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry_type: Option<GeometryType>,
    pub rows_loaded: usize,
    pub rows_failed: usize,
    #[serde(skip)]
    pub diagnostics: Vec<RowDiagnostic>,
}

impl TableReport {
    pub fn is_ok(&self) -> bool {
        self.status == ReportStatus::Ok
    }

    fn ok(summary: SheetSummary) -> Self {
        Self {
            status: ReportStatus::Ok,
            table_name: summary.table,
            reason: None,
            geography: summary.strategy.geography().map(str::to_string),
            geometry_type: summary.strategy.declared(),
            rows_loaded: summary.rows_loaded,
            rows_failed: summary.failed,
            diagnostics: summary.diagnostics,
        }
    }

    fn error(table: &str, error: &IngestionError) -> Self {
        let rows_failed = match error {
            IngestionError::Ungeometrizable { failed_rows, .. } => *failed_rows,
            _ => 0,
        };
        Self {
            status: ReportStatus::Error,
            table_name: table.to_string(),
            reason: Some(error.to_string()),
            geography: None,
            geometry_type: None,
            rows_loaded: 0,
            rows_failed,
            diagnostics: Vec::new(),
        }
    }
}

/// Ingest every sheet of `source` into `loader`.
///
/// Each sheet is probed, decided, and loaded on its own: a failing sheet yields an error report
/// and an `abort_table` on the loader while the other sheets continue. Errors that prevent any
/// sheet from being read (opening the source, starting the thread pool) are returned as `Err`.
///
/// When an observer is configured, this function reports per table:
///
/// - `on_success` with row stats
/// - `on_failure` with a computed severity
/// - `on_alert` when the computed severity is >= `options.alert_at_or_above`
/// - `on_diagnostic` for each stored row diagnostic
pub fn load_source(
    source: Box<dyn RowSource>,
    catalog: &GeographyCatalog,
    loader: &mut dyn Loader,
    options: &IngestOptions,
) -> IngestionResult<Vec<TableReport>> {
    let source_name = source.name().to_string();
    let source_ctx = IngestionContext {
        source: source_name.clone(),
        table: clean_table_name(&source_name),
    };

    let prepared = options.engine().and_then(|engine| Ok((engine, source.into_sheets()?)));
    let (engine, sheets) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            report_failure(options, &source_ctx, &e);
            return Err(e);
        }
    };

    let mut reports = Vec::with_capacity(sheets.len());
    let mut taken = HashSet::new();
    for sheet in sheets {
        let context = IngestionContext {
            source: source_name.clone(),
            table: unique_table_name(&mut taken, clean_table_name(&sheet.name)),
        };
        let report = match load_sheet(sheet, catalog, loader, &engine, options, context.clone()) {
            Ok(summary) => {
                if let Some(obs) = &options.observer {
                    obs.on_success(
                        &context,
                        IngestionStats {
                            rows: summary.rows_loaded,
                            resolved: summary.resolved,
                            failed: summary.failed,
                        },
                    );
                }
                TableReport::ok(summary)
            }
            Err(e) => {
                report_failure(options, &context, &e);
                TableReport::error(&context.table, &e)
            }
        };
        reports.push(report);
    }
    Ok(reports)
}

/// Suffix `name` with `_2`, `_3`, ... until no earlier sheet of the source uses it.
fn unique_table_name(taken: &mut HashSet<String>, name: String) -> String {
    let mut candidate = name.clone();
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = format!("{name}_{n}");
        n += 1;
    }
    if candidate != name {
        warn!("table name '{name}' already used by an earlier sheet, loading as '{candidate}'");
    }
    taken.insert(candidate.clone());
    candidate
}

fn load_sheet(
    sheet: Sheet,
    catalog: &GeographyCatalog,
    loader: &mut dyn Loader,
    engine: &NormalizationEngine,
    options: &IngestOptions,
    context: IngestionContext,
) -> IngestionResult<SheetSummary> {
    let table = context.table.clone();
    let mut stream = ingest_in_context(sheet, catalog, engine, options, context)?;
    loader.begin_table(stream.table_spec())?;

    let started = engine.begin_run(&table);
    let result = stream_into(&mut stream, &table, loader).and_then(|()| stream.finish());
    engine.end_run(&table, started);

    let finished = result.and_then(|summary| {
        loader.finish_table(&table)?;
        Ok(summary)
    });
    if finished.is_err() {
        loader.abort_table(&table);
    }
    finished
}

fn stream_into(stream: &mut RecordStream<'_>, table: &str, loader: &mut dyn Loader) -> IngestionResult<()> {
    let mut declared = stream.strategy().declared();
    while let Some(batch) = stream.next_batch() {
        let batch = batch?;
        let current = stream.strategy().declared();
        if current != declared {
            if let Some(geometry_type) = current {
                loader.widen_geometry(table, geometry_type)?;
            }
            declared = current;
        }
        if !batch.is_empty() {
            loader.load_batch(table, &batch)?;
        }
    }
    Ok(())
}

pub(crate) fn report_failure(options: &IngestOptions, ctx: &IngestionContext, error: &IngestionError) {
    let Some(obs) = options.observer.as_ref() else {
        return;
    };
    let sev = severity_for_error(error);
    obs.on_failure(ctx, sev, error);
    if sev >= options.alert_at_or_above {
        obs.on_alert(ctx, sev, error);
    }
}

fn severity_for_error(e: &IngestionError) -> IngestionSeverity {
    match e {
        IngestionError::Io(_) => IngestionSeverity::Critical,
        IngestionError::Parquet(err) => {
            // Parquet errors often wrap IO, but not always in a structured way.
            if error_chain_contains_io(err) {
                IngestionSeverity::Critical
            } else {
                IngestionSeverity::Error
            }
        }
        IngestionError::Csv(err) => match err.kind() {
            ::csv::ErrorKind::Io(_) => IngestionSeverity::Critical,
            _ => IngestionSeverity::Error,
        },
        #[cfg(feature = "excel")]
        IngestionError::Excel(_) => IngestionSeverity::Error,
        IngestionError::Json(_) => IngestionSeverity::Error,
        IngestionError::EmptySource { .. } => IngestionSeverity::Error,
        IngestionError::UnsupportedFormat { .. } => IngestionSeverity::Error,
        IngestionError::Ungeometrizable { .. } => IngestionSeverity::Error,
        IngestionError::Load(err) => match err.kind {
            LoadErrorKind::Io => IngestionSeverity::Critical,
            LoadErrorKind::ConstraintViolation | LoadErrorKind::Rejected => IngestionSeverity::Error,
        },
        IngestionError::Cancelled { .. } => IngestionSeverity::Warning,
        IngestionError::ThreadPool(_) => IngestionSeverity::Critical,
    }
}

fn error_chain_contains_io(e: &(dyn StdError + 'static)) -> bool {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(e);
    while let Some(err) = cur {
        if err.is::<std::io::Error>() {
            return true;
        }
        cur = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::source::MemorySource;
    use crate::loader::MemoryLoader;

    fn text_rows(rows: &[&[&str]]) -> Vec<Vec<Value>> {
        rows.iter()
            .map(|r| r.iter().map(|v| Value::from_text(v)).collect())
            .collect()
    }

    fn probed(headers: &[&str], rows: &[&[&str]]) -> ProbedSheet {
        probe_sheet(MemorySource::single("t", headers, text_rows(rows)).into_sheet(), 10).unwrap()
    }

    fn small_options() -> IngestOptions {
        IngestOptions {
            execution: ExecutionOptions {
                num_threads: Some(2),
                chunk_size: 2,
            },
            ..Default::default()
        }
    }

    #[test]
    fn clean_table_name_rules() {
        assert_eq!(clean_table_name("My Sheet-1: v2.0"), "my_sheet_1__v20");
        assert_eq!(clean_table_name("cities"), "cities");
    }

    #[test]
    fn coordinates_decide_a_point_strategy() {
        let catalog = GeographyCatalog::builtin();
        let strategy = decide_strategy(&catalog, &probed(&["lat", "lon", "name"], &[&["45.5", "-122.6", "X"]]));
        match strategy {
            GeometryStrategy::Geometric {
                signal: GeometrySignal::Point(_),
                declared,
                geography,
            } => {
                assert_eq!(declared, GeometryType::Point);
                assert_eq!(geography, "latitude_and_longitude");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mixed_polygon_samples_declare_multipolygon() {
        let catalog = GeographyCatalog::builtin();
        let p = probed(
            &["wkt"],
            &[
                &["POLYGON ((0 0, 1 0, 1 1, 0 0))"],
                &["MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)))"],
            ],
        );
        assert_eq!(decide_strategy(&catalog, &p).declared(), Some(GeometryType::MultiPolygon));
    }

    #[test]
    fn no_signal_is_plain() {
        let catalog = GeographyCatalog::builtin();
        let strategy = decide_strategy(&catalog, &probed(&["name", "population"], &[&["a", "1"]]));
        assert_eq!(strategy, GeometryStrategy::Plain);
    }

    #[test]
    fn custom_geography_becomes_a_join() {
        let catalog = GeographyCatalog::from_json_str(
            r#"[{"name":"us_states","fields":{"state_name":{"potential_names":["state"]}},"rank":4}]"#,
        )
        .unwrap()
        .with_builtin_signals();
        let strategy = decide_strategy(&catalog, &probed(&["State", "votes"], &[&["Ohio", "3"]]));
        assert_eq!(
            strategy,
            GeometryStrategy::Join(JoinSpec {
                map_table: "us_states".to_string(),
                keys: vec![JoinKey {
                    column: "State".to_string(),
                    map_field: "state_name".to_string(),
                }],
            })
        );
    }

    #[test]
    fn record_stream_drops_encoded_column_and_numbers_rows() {
        let catalog = GeographyCatalog::builtin();
        let engine = small_options().engine().unwrap();
        let sheet = MemorySource::single(
            "Places",
            &["id", "wkt"],
            text_rows(&[&["1", "POINT (1 2)"], &["2", "nonsense"], &["3", "POINT (3 4)"]]),
        )
        .into_sheet();
        let mut stream = ingest(sheet, &catalog, &engine, &small_options()).unwrap();
        assert_eq!(stream.table_spec().name, "places");
        assert_eq!(stream.table_spec().columns, vec!["id"]);

        let records: Vec<Record> = stream.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].row, 2);
        assert!(records[1].geometry.is_none());
        assert_eq!(records[2].values, vec![Value::Utf8("3".to_string())]);

        let summary = stream.finish().unwrap();
        assert_eq!((summary.resolved, summary.failed), (2, 1));
        assert_eq!(summary.diagnostics[0].row, 2);
    }

    #[test]
    fn failed_rows_can_be_dropped_and_diagnostics_capped() {
        let catalog = GeographyCatalog::builtin();
        let options = IngestOptions {
            keep_failed_rows: false,
            max_diagnostics: 1,
            ..small_options()
        };
        let engine = options.engine().unwrap();
        let sheet = MemorySource::single(
            "t",
            &["lat", "lon"],
            text_rows(&[&["91", "0"], &["1", "1"], &["x", "0"]]),
        )
        .into_sheet();
        let stream = ingest(sheet, &catalog, &engine, &options).unwrap();
        let summary = stream.finish().unwrap();
        assert_eq!(summary.rows_read, 3);
        assert_eq!(summary.rows_loaded, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.diagnostics.len(), 1);
    }

    #[test]
    fn cancelled_run_stops_between_rows() {
        let catalog = GeographyCatalog::builtin();
        let flag = Arc::new(AtomicBool::new(false));
        let options = IngestOptions {
            cancel: Some(Arc::clone(&flag)),
            ..small_options()
        };
        let engine = options.engine().unwrap();
        let row: &[&str] = &["1", "1"];
        let sheet = MemorySource::single("t", &["lat", "lon"], text_rows(&[row; 6])).into_sheet();
        let mut stream = ingest(sheet, &catalog, &engine, &options).unwrap();
        assert!(stream.next_batch().unwrap().is_ok());
        flag.store(true, Ordering::SeqCst);
        match stream.next_batch() {
            Some(Err(IngestionError::Cancelled { rows })) => assert_eq!(rows, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(stream.next_batch().is_none());
    }

    #[test]
    fn late_geometry_outside_the_sampled_type_widens_the_column() {
        let mut rows: Vec<Vec<Value>> = (0..10).map(|i| vec![Value::Utf8(format!("POINT ({i} 1)"))]).collect();
        rows.push(vec![Value::Utf8("LINESTRING (0 0, 1 1)".to_string())]);
        let source = MemorySource::single("tracks", &["wkt"], rows);

        let mut loader = MemoryLoader::new();
        let reports =
            load_source(Box::new(source), &GeographyCatalog::builtin(), &mut loader, &IngestOptions::default())
                .unwrap();
        assert_eq!(reports[0].geometry_type, Some(GeometryType::Geometry));
        assert_eq!(reports[0].rows_failed, 0);
        assert!(reports[0].diagnostics.is_empty());

        let table = loader.table("tracks").unwrap();
        assert!(matches!(
            table.spec.geometry,
            TableGeometry::Typed { geometry_type: GeometryType::Geometry, .. }
        ));
        let last = table.records[10].geometry.as_ref().unwrap();
        assert_eq!(last.geometry_type(), GeometryType::LineString);
        assert_eq!(table.records[0].geometry.as_ref().unwrap().geometry_type(), GeometryType::Point);
    }

    #[test]
    fn late_multipolygon_promotes_earlier_polygons() {
        let rows = text_rows(&[
            &["POLYGON ((0 0, 1 0, 1 1, 0 0))"],
            &["POLYGON ((2 2, 3 2, 3 3, 2 2))"],
            &["POLYGON ((4 4, 5 4, 5 5, 4 4))"],
            &["MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)), ((2 2, 3 2, 3 3, 2 2)))"],
        ]);
        let source = MemorySource::single("parcels", &["wkt"], rows);
        let options = IngestOptions {
            sample_size: 2,
            ..small_options()
        };

        let mut loader = MemoryLoader::new();
        let reports = load_source(Box::new(source), &GeographyCatalog::builtin(), &mut loader, &options).unwrap();
        assert_eq!(reports[0].geometry_type, Some(GeometryType::MultiPolygon));
        assert_eq!(reports[0].rows_failed, 0);

        let table = loader.table("parcels").unwrap();
        assert_eq!(table.records.len(), 4);
        for record in &table.records {
            assert_eq!(record.geometry.as_ref().unwrap().geometry_type(), GeometryType::MultiPolygon);
        }
    }

    #[test]
    fn colliding_sheet_names_get_distinct_tables() {
        let source = MemorySource::new("upload")
            .with_sheet("A B", &["name"], text_rows(&[&["x"]]))
            .with_sheet("a_b", &["name"], text_rows(&[&["y"], &["z"]]))
            .with_sheet("A-B", &["name"], text_rows(&[&["w"]]));

        let mut loader = MemoryLoader::new();
        let reports = load_source(Box::new(source), &GeographyCatalog::builtin(), &mut loader, &small_options())
            .unwrap();
        let names: Vec<&str> = reports.iter().map(|r| r.table_name.as_str()).collect();
        assert_eq!(names, vec!["a_b", "a_b_2", "a_b_3"]);

        assert_eq!(loader.tables().len(), 3);
        assert_eq!(loader.table("a_b").unwrap().records.len(), 1);
        assert_eq!(loader.table("a_b_2").unwrap().records.len(), 2);
        assert_eq!(loader.table("a_b_3").unwrap().records.len(), 1);
    }

    #[test]
    fn report_serializes_status_and_table_name() {
        let mut loader = MemoryLoader::new();
        let source = MemorySource::single("Good Sheet", &["lat", "lon"], text_rows(&[&["1", "2"]]))
            .with_sheet("empty", &["lat", "lon"], Vec::new());
        let reports = load_source(Box::new(source), &GeographyCatalog::builtin(), &mut loader, &small_options())
            .unwrap();

        let ok = serde_json::to_value(&reports[0]).unwrap();
        assert_eq!(ok["status"], "ok");
        assert_eq!(ok["table_name"], "good_sheet");
        assert!(ok.get("reason").is_none());

        let err = serde_json::to_value(&reports[1]).unwrap();
        assert_eq!(err["status"], "error");
        assert_eq!(err["table_name"], "empty");
        assert!(err["reason"].as_str().unwrap().contains("no data rows"));
    }
}
