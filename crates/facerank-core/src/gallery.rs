//! Gallery validation: decide which reference images can be compared.

use crate::engine::FaceEngine;
use crate::error::PipelineError;
use crate::types::{GalleryEntry, ImageHandle};
use std::path::{Path, PathBuf};

/// File extensions accepted for gallery and query images (compared
/// case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Whether `name` ends in one of [`IMAGE_EXTENSIONS`], ignoring case.
pub fn is_image_name(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)),
        None => false,
    }
}

/// Like [`is_image_name`], but only the extension has to be valid UTF-8.
fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// List the candidate image files in `dir`, sorted by file name.
///
/// Non-image files and subdirectories are skipped silently. The sort makes
/// the listing order (and with it the tie-break order of the ranking)
/// independent of the filesystem.
pub fn list_candidates(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let unreadable = |source| PipelineError::GalleryUnreadable {
        path: dir.to_path_buf(),
        source,
    };

    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(
                    dir = %dir.display(),
                    error = %err,
                    "skipping unreadable directory entry"
                );
                continue;
            }
        };
        let path = entry.path();
        if has_image_extension(&path) && path.is_file() {
            candidates.push(path);
        }
    }

    candidates.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(candidates)
}

/// Only the entries on which face detection succeeded, in scan order.
pub fn usable(entries: &[GalleryEntry]) -> impl Iterator<Item = &GalleryEntry> {
    entries.iter().filter(|e| e.usable)
}

/// Classifies gallery images as usable or unusable via face detection.
#[derive(Debug, Clone, Default)]
pub struct GalleryValidator {
    max_entries: Option<usize>,
}

impl GalleryValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Examine at most `limit` candidates per scan.
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self { max_entries: limit }
    }

    /// Scan `dir` and classify every candidate image.
    pub fn validate<E: FaceEngine + ?Sized>(
        &self,
        engine: &E,
        dir: &Path,
    ) -> Result<Vec<GalleryEntry>, PipelineError> {
        let candidates = list_candidates(dir)?;
        self.classify(engine, candidates)
    }

    /// Run face detection over an already-listed set of candidates.
    ///
    /// A reference that fails detection for any reason is marked unusable
    /// and the scan moves on. Only an unavailable engine aborts.
    pub fn classify<E: FaceEngine + ?Sized>(
        &self,
        engine: &E,
        mut candidates: Vec<PathBuf>,
    ) -> Result<Vec<GalleryEntry>, PipelineError> {
        if let Some(limit) = self.max_entries {
            if candidates.len() > limit {
                tracing::warn!(
                    found = candidates.len(),
                    limit,
                    "gallery larger than limit; ignoring the remainder"
                );
                candidates.truncate(limit);
            }
        }

        let mut entries = Vec::with_capacity(candidates.len());
        for path in candidates {
            let image = ImageHandle::from_path(path);
            let usable = match engine.detect(&image) {
                Ok(true) => true,
                Ok(false) => {
                    tracing::warn!(entry = %image.id, "skipping reference: no face detected");
                    false
                }
                Err(err) if err.is_fatal() => {
                    return Err(PipelineError::EngineUnavailable(err.to_string()));
                }
                Err(err) => {
                    tracing::warn!(
                        entry = %image.id,
                        error = %err,
                        "skipping reference: detection failed"
                    );
                    false
                }
            };
            entries.push(GalleryEntry { image, usable });
        }

        tracing::info!(
            scanned = entries.len(),
            usable = usable(&entries).count(),
            "gallery validated"
        );
        Ok(entries)
    }
}
