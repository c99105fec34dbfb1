//! Similarity scoring of the query against a single reference.

use crate::engine::{EngineError, FaceEngine};
use crate::types::{GalleryEntry, ImageHandle, MatchResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// A comparison that produced no opinion for one reference in this query.
#[derive(Error, Debug)]
#[error("comparison against {entry_id} failed: {error}")]
pub struct ComparisonFailure {
    pub entry_id: String,
    #[source]
    pub error: EngineError,
}

/// Comparison workers that may still be running after timing out before
/// further timed comparisons are refused.
pub const MAX_COMPARE_WORKERS: usize = 4;

/// Scores a query image against one gallery entry at a time.
pub struct Scorer<E> {
    engine: Arc<E>,
    timeout: Option<Duration>,
    running: Arc<AtomicUsize>,
    max_workers: usize,
}

impl<E: FaceEngine + 'static> Scorer<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            timeout: None,
            running: Arc::new(AtomicUsize::new(0)),
            max_workers: MAX_COMPARE_WORKERS,
        }
    }

    /// Give up on any single comparison after `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cap on comparison workers left running by earlier timeouts.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Compare `query` against `reference`. Neither handle is modified.
    pub fn score(
        &self,
        query: &ImageHandle,
        reference: &GalleryEntry,
    ) -> Result<MatchResult, ComparisonFailure> {
        let started = Instant::now();
        let distance = match self.timeout {
            Some(limit) => self.compare_within(query, &reference.image, limit),
            None => self.engine.compare(query, &reference.image),
        };

        let fail = |error| ComparisonFailure {
            entry_id: reference.id().to_string(),
            error,
        };
        let distance = distance.map_err(fail)?;
        if !distance.is_finite() {
            return Err(fail(EngineError::Inference(format!(
                "engine returned non-finite distance {distance}"
            ))));
        }

        tracing::debug!(
            entry = %reference.id(),
            distance,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compared"
        );
        Ok(MatchResult::from_distance(reference.id(), distance))
    }

    /// Run the comparison on a worker thread and stop waiting after `limit`.
    ///
    /// A worker that overruns is left to finish on its own; its answer is
    /// discarded. It may still open the query after the caller has released
    /// it, so a staged query file can already be gone and the late read fail.
    /// While `max_workers` overrun workers are still running, no new one is
    /// started and the comparison fails at once.
    fn compare_within(
        &self,
        query: &ImageHandle,
        reference: &ImageHandle,
        limit: Duration,
    ) -> Result<f32, EngineError> {
        let running = self.running.load(Ordering::Acquire);
        if running >= self.max_workers {
            tracing::warn!(running, entry = %reference.id, "comparison workers still busy");
            return Err(EngineError::Inference(format!(
                "{running} timed-out comparisons still running"
            )));
        }

        let (tx, rx) = mpsc::channel();
        let engine = Arc::clone(&self.engine);
        let (query, reference) = (query.clone(), reference.clone());
        let worker = WorkerSlot::take(&self.running);

        std::thread::Builder::new()
            .name("facerank-compare".into())
            .spawn(move || {
                let result = engine.compare(&query, &reference);
                drop(worker);
                let _ = tx.send(result);
            })?;

        match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(EngineError::Timeout(limit)),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::Inference(
                "comparison worker exited without a result".into(),
            )),
        }
    }
}

/// One running comparison worker; released on drop, including on panic or
/// when the thread never starts.
struct WorkerSlot(Arc<AtomicUsize>);

impl WorkerSlot {
    fn take(running: &Arc<AtomicUsize>) -> Self {
        running.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(running))
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
