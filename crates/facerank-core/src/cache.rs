//! Process-wide cache of the validated gallery.
//!
//! Initialised by the first validation of a directory. Refreshed whenever
//! the directory's fingerprint (file names, sizes, modification times)
//! differs from the cached one, or after an explicit [`GalleryCache::invalidate`].

use crate::engine::FaceEngine;
use crate::error::PipelineError;
use crate::gallery::{list_candidates, GalleryValidator};
use crate::types::GalleryEntry;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::UNIX_EPOCH;

/// Digest of a gallery directory's observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GalleryFingerprint([u8; 32]);

impl GalleryFingerprint {
    /// Fingerprint `dir` from its already-listed candidate files.
    pub fn of(dir: &Path, candidates: &[PathBuf]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(dir.as_os_str().as_encoded_bytes());
        for path in candidates {
            hasher.update([0u8]);
            hasher.update(path.as_os_str().as_encoded_bytes());
            match std::fs::metadata(path) {
                Ok(meta) => {
                    hasher.update(meta.len().to_le_bytes());
                    let mtime = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_nanos())
                        .unwrap_or(0);
                    hasher.update(mtime.to_le_bytes());
                }
                // Vanished since listing; the next lookup will miss anyway.
                Err(_) => hasher.update([0xff]),
            }
        }
        Self(hasher.finalize().into())
    }
}

struct CachedScan {
    fingerprint: GalleryFingerprint,
    entries: Vec<GalleryEntry>,
}

/// Holds the most recent validated scan of one gallery directory.
#[derive(Default)]
pub struct GalleryCache {
    slot: Mutex<Option<CachedScan>>,
}

impl GalleryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the validated gallery for `dir`, re-running the validator only
    /// when the directory changed since the cached scan.
    pub fn get_or_validate<E: FaceEngine + ?Sized>(
        &self,
        engine: &E,
        validator: &GalleryValidator,
        dir: &Path,
    ) -> Result<Vec<GalleryEntry>, PipelineError> {
        let candidates = list_candidates(dir)?;
        let fingerprint = GalleryFingerprint::of(dir, &candidates);

        let mut slot = self.lock();
        if let Some(cached) = slot.as_ref() {
            if cached.fingerprint == fingerprint {
                tracing::debug!(dir = %dir.display(), "gallery cache hit");
                return Ok(cached.entries.clone());
            }
            tracing::info!(dir = %dir.display(), "gallery changed; revalidating");
        }

        let entries = validator.classify(engine, candidates)?;
        *slot = Some(CachedScan {
            fingerprint,
            entries: entries.clone(),
        });
        Ok(entries)
    }

    /// Drop the cached scan; the next lookup revalidates.
    pub fn invalidate(&self) {
        *self.lock() = None;
    }

    pub fn is_warm(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<CachedScan>> {
        // The slot only ever holds a complete scan, so a poisoned lock is safe to reuse.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}
