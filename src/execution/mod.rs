//! Execution engine for row-level geometry normalization.
//!
//! Rows are normalized in chunks on a dedicated `rayon` pool. Within a chunk rows run in
//! parallel, and results come back in input order. The pipeline pulls one chunk at a time from
//! the row source, so at most `chunk_size` rows are buffered.
//!
//! The engine also provides:
//!
//! - Real-time metrics ([`ExecutionMetrics`]) per table run
//! - Observer hooks ([`ExecutionObserver`]) for chunk progress

mod observer;

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::IngestionResult;
use crate::normalize::{GeometrySignal, RowGeometry, normalize_row};
use crate::types::Value;

pub use observer::{
    ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver, StdErrExecutionObserver,
};

/// Configuration for the [`NormalizationEngine`].
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Number of worker threads used by the engine.
    ///
    /// If `None`, uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    /// Number of rows pulled from the source and normalized per chunk.
    ///
    /// Bounds the working-set size of a run; values of 0 are treated as 1.
    pub chunk_size: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            num_threads: Some(n),
            chunk_size: 4_096,
        }
    }
}

/// Chunked, order-preserving geometry normalization on a private thread pool.
pub struct NormalizationEngine {
    pool: ThreadPool,
    opts: ExecutionOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl std::fmt::Debug for NormalizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizationEngine")
            .field("opts", &self.opts)
            .field("observer_set", &self.observer.is_some())
            .finish()
    }
}

impl NormalizationEngine {
    /// Create a new engine with the given options.
    ///
    /// Fails with [`crate::IngestionError::ThreadPool`] when the pool cannot be built.
    pub fn new(opts: ExecutionOptions) -> IngestionResult<Self> {
        let n_threads = opts
            .num_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
            .max(1);

        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("geo-normalize-{i}"))
            .build()?;

        Ok(Self {
            pool,
            opts: ExecutionOptions {
                chunk_size: opts.chunk_size.max(1),
                ..opts
            },
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for execution events (metrics/logging).
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn chunk_size(&self) -> usize {
        self.opts.chunk_size
    }

    /// Reset metrics and announce a run for `table`; pass the returned instant to
    /// [`Self::end_run`].
    pub fn begin_run(&self, table: &str) -> Instant {
        self.metrics.begin_run();
        self.emit(ExecutionEvent::RunStarted {
            table: table.to_string(),
        });
        Instant::now()
    }

    pub fn end_run(&self, table: &str, started: Instant) {
        let elapsed = started.elapsed();
        self.metrics.end_run(elapsed);
        self.emit(ExecutionEvent::RunFinished {
            table: table.to_string(),
            elapsed,
            metrics: self.metrics.snapshot(),
        });
    }

    /// Normalize one chunk of rows under `signal`, returning one [`RowGeometry`] per row in the
    /// same order.
    ///
    /// `start_row` is the 1-based row number of the first row in `rows` and is only used for
    /// reporting.
    pub fn normalize_chunk(
        &self,
        start_row: usize,
        rows: &[Vec<Value>],
        signal: Option<&GeometrySignal>,
    ) -> Vec<RowGeometry> {
        self.metrics.on_chunk_start();
        self.emit(ExecutionEvent::ChunkStarted {
            start_row,
            row_count: rows.len(),
        });

        let out: Vec<RowGeometry> = self.pool.install(|| {
            rows.par_iter()
                .map(|row| normalize_row(signal, row))
                .collect()
        });

        let resolved = out.iter().filter(|g| g.is_resolved()).count();
        let failed = out
            .iter()
            .filter(|g| matches!(g, RowGeometry::Failed(_)))
            .count();
        self.metrics.on_chunk_end(resolved, failed, rows.len());
        self.emit(ExecutionEvent::ChunkFinished { resolved, failed });
        out
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}
