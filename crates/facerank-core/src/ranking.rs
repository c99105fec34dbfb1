//! Ranking aggregation over the validated gallery.

use crate::engine::FaceEngine;
use crate::error::PipelineError;
use crate::gallery::usable;
use crate::scorer::{ComparisonFailure, Scorer};
use crate::types::{GalleryEntry, ImageHandle, RankedResults};

/// Outcome of one ranking run: the ordered results plus what was left out.
#[derive(Debug, Default)]
pub struct Ranking {
    pub results: RankedResults,
    /// Usable references whose comparison failed in this run.
    pub failures: Vec<ComparisonFailure>,
    /// Gallery images examined by the validator.
    pub scanned: usize,
    /// Gallery images rejected by face detection.
    pub unusable: usize,
}

/// Scores the query against every usable entry and sorts the results.
pub struct Aggregator<E> {
    scorer: Scorer<E>,
    top_k: Option<usize>,
}

impl<E: FaceEngine + 'static> Aggregator<E> {
    pub fn new(scorer: Scorer<E>) -> Self {
        Self { scorer, top_k: None }
    }

    /// Keep only the `k` best results.
    pub fn with_top_k(mut self, k: Option<usize>) -> Self {
        self.top_k = k;
        self
    }

    /// Rank `query` against the usable entries of `entries`.
    ///
    /// Each entry is scored independently; failures are collected rather
    /// than propagated. An empty result is a valid outcome. Only an
    /// unavailable engine ends the run with an error.
    pub fn rank(
        &self,
        query: &ImageHandle,
        entries: &[GalleryEntry],
    ) -> Result<Ranking, PipelineError> {
        let mut successes = Vec::new();
        let mut failures = Vec::new();

        for entry in usable(entries) {
            match self.scorer.score(query, entry) {
                Ok(result) => successes.push(result),
                Err(failure) if failure.error.is_fatal() => {
                    return Err(PipelineError::EngineUnavailable(failure.error.to_string()));
                }
                Err(failure) => {
                    tracing::warn!(
                        entry = %failure.entry_id,
                        error = %failure.error,
                        "comparison failed; leaving reference out of this ranking"
                    );
                    failures.push(failure);
                }
            }
        }

        // Sorted only once every comparison is in, so ordering never depends
        // on completion order.
        let mut results = RankedResults::from_unsorted(successes);
        if let Some(k) = self.top_k {
            results.truncate(k);
        }

        let unusable = entries.iter().filter(|e| !e.usable).count();
        tracing::info!(
            query = %query.id,
            ranked = results.len(),
            failed = failures.len(),
            unusable,
            "ranking complete"
        );

        Ok(Ranking {
            results,
            failures,
            scanned: entries.len(),
            unusable,
        })
    }
}
