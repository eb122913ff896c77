use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Events emitted by the [`super::NormalizationEngine`].
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted { table: String },
    ChunkStarted { start_row: usize, row_count: usize },
    ChunkFinished { resolved: usize, failed: usize },
    RunFinished {
        table: String,
        elapsed: Duration,
        metrics: ExecutionMetricsSnapshot,
    },
}

/// Observer hook for execution events.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// A simple stderr logger for execution events.
#[derive(Debug, Default)]
pub struct StdErrExecutionObserver;

impl ExecutionObserver for StdErrExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        eprintln!("[normalize] {event:?}");
    }
}

/// Real-time metrics for the current normalization run (one run per table).
///
/// The engine updates these counters while it works; callers can snapshot them at any time.
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,

    rows_processed: AtomicU64,
    rows_resolved: AtomicU64,
    rows_failed: AtomicU64,
    chunks_started: AtomicU64,
    chunks_finished: AtomicU64,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);
        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.rows_processed.store(0, Ordering::SeqCst);
        self.rows_resolved.store(0, Ordering::SeqCst);
        self.rows_failed.store(0, Ordering::SeqCst);
        self.chunks_started.store(0, Ordering::SeqCst);
        self.chunks_finished.store(0, Ordering::SeqCst);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub fn on_chunk_start(&self) {
        let _ = self.chunks_started.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_chunk_end(&self, resolved: usize, failed: usize, processed: usize) {
        let _ = self.rows_processed.fetch_add(processed as u64, Ordering::SeqCst);
        let _ = self.rows_resolved.fetch_add(resolved as u64, Ordering::SeqCst);
        let _ = self.rows_failed.fetch_add(failed as u64, Ordering::SeqCst);
        let _ = self.chunks_finished.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        let elapsed = if elapsed_ns > 0 {
            Some(Duration::from_nanos(elapsed_ns))
        } else {
            None
        };

        ExecutionMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            elapsed,
            rows_processed: self.rows_processed.load(Ordering::SeqCst),
            rows_resolved: self.rows_resolved.load(Ordering::SeqCst),
            rows_failed: self.rows_failed.load(Ordering::SeqCst),
            chunks_started: self.chunks_started.load(Ordering::SeqCst),
            chunks_finished: self.chunks_finished.load(Ordering::SeqCst),
        }
    }
}

/// Immutable snapshot of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMetricsSnapshot {
    pub run_id: u64,
    pub elapsed: Option<Duration>,
    pub rows_processed: u64,
    pub rows_resolved: u64,
    pub rows_failed: u64,
    pub chunks_started: u64,
    pub chunks_finished: u64,
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, rows_processed={}, resolved={}, failed={}, chunks={}/{}, elapsed={:?}",
            self.run_id,
            self.rows_processed,
            self.rows_resolved,
            self.rows_failed,
            self.chunks_finished,
            self.chunks_started,
            self.elapsed
        )
    }
}
