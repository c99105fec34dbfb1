use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the bytes behind an [`ImageHandle`] live.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// An image file on disk (gallery references, staged queries).
    Path(PathBuf),
    /// An in-memory buffer, shared between every comparison of one run.
    Bytes(Arc<[u8]>),
}

/// Opaque, immutable reference to image bytes plus a stable identifier.
///
/// Cloning is cheap: paths are copied, buffers are reference counted.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    /// File name for gallery entries; advisory upload name for queries.
    pub id: String,
    pub source: ImageSource,
}

impl ImageHandle {
    /// Handle for a file on disk, identified by its base name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            id,
            source: ImageSource::Path(path),
        }
    }

    /// Handle for an in-memory buffer.
    pub fn from_bytes(id: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id: id.into(),
            source: ImageSource::Bytes(bytes.into()),
        }
    }

    /// Path of the backing file, if the image lives on disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ImageSource::Path(p) => Some(p),
            ImageSource::Bytes(_) => None,
        }
    }

    /// Read the encoded image bytes regardless of where they live.
    pub fn read_bytes(&self) -> std::io::Result<Arc<[u8]>> {
        match &self.source {
            ImageSource::Path(p) => Ok(std::fs::read(p)?.into()),
            ImageSource::Bytes(b) => Ok(Arc::clone(b)),
        }
    }
}

/// A gallery image together with its validation outcome.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub image: ImageHandle,
    /// True when the engine found a face in the image.
    pub usable: bool,
}

impl GalleryEntry {
    pub fn id(&self) -> &str {
        &self.image.id
    }
}

/// Outcome of one successful query-vs-reference comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub entry_id: String,
    /// `1 - distance`. Not clamped: engines with unbounded distances
    /// produce negative values.
    pub similarity: f32,
}

impl MatchResult {
    pub fn from_distance(entry_id: impl Into<String>, distance: f32) -> Self {
        Self {
            entry_id: entry_id.into(),
            similarity: 1.0 - distance,
        }
    }
}

/// Match results ordered best-first. Built fresh for every query.
///
/// Deserialization goes through [`RankedResults::from_unsorted`], so the
/// order is re-established whatever order the input arrives in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<MatchResult>", into = "Vec<MatchResult>")]
pub struct RankedResults(Vec<MatchResult>);

impl RankedResults {
    /// Sort descending by similarity. The sort is stable, so equal
    /// similarities keep the order in which `results` arrived.
    pub fn from_unsorted(mut results: Vec<MatchResult>) -> Self {
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        Self(results)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MatchResult> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The closest reference, if any comparison succeeded.
    pub fn best(&self) -> Option<&MatchResult> {
        self.0.first()
    }

    /// Keep only the `k` best results.
    pub fn truncate(&mut self, k: usize) {
        self.0.truncate(k);
    }
}

impl From<Vec<MatchResult>> for RankedResults {
    fn from(results: Vec<MatchResult>) -> Self {
        Self::from_unsorted(results)
    }
}

impl From<RankedResults> for Vec<MatchResult> {
    fn from(ranked: RankedResults) -> Self {
        ranked.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, similarity: f32) -> MatchResult {
        MatchResult { entry_id: id.into(), similarity }
    }

    #[test]
    fn test_similarity_is_one_minus_distance() {
        let r = MatchResult::from_distance("a.jpg", 0.25);
        assert!((r.similarity - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_not_clamped() {
        let r = MatchResult::from_distance("a.jpg", 1.6);
        assert!((r.similarity + 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_ranked_descending() {
        let ranked = RankedResults::from_unsorted(vec![
            result("low", 0.1),
            result("high", 0.9),
            result("neg", -0.3),
            result("mid", 0.5),
        ]);
        let ids: Vec<_> = ranked.iter().map(|r| r.entry_id.as_str()).collect();
        assert_eq!(ids, ["high", "mid", "low", "neg"]);
        assert_eq!(ranked.best().map(|r| r.entry_id.as_str()), Some("high"));
    }

    #[test]
    fn test_ranked_ties_keep_input_order() {
        let ranked = RankedResults::from_unsorted(vec![
            result("b.png", 0.42),
            result("top.png", 0.8),
            result("a.png", 0.42),
        ]);
        let ids: Vec<_> = ranked.iter().map(|r| r.entry_id.as_str()).collect();
        assert_eq!(ids, ["top.png", "b.png", "a.png"]);
    }

    #[test]
    fn test_ranked_serializes_as_array() {
        let ranked = RankedResults::from_unsorted(vec![result("x.jpg", 0.5)]);
        let json = serde_json::to_value(&ranked).unwrap();
        assert_eq!(json, serde_json::json!([{ "entry_id": "x.jpg", "similarity": 0.5 }]));
    }

    #[test]
    fn test_deserialized_results_are_resorted() {
        let ranked: RankedResults = serde_json::from_str(
            r#"[
                {"entry_id": "low", "similarity": 0.1},
                {"entry_id": "high", "similarity": 0.9},
                {"entry_id": "mid", "similarity": 0.5}
            ]"#,
        )
        .unwrap();
        let ids: Vec<_> = ranked.iter().map(|r| r.entry_id.as_str()).collect();
        assert_eq!(ids, ["high", "mid", "low"]);
        assert_eq!(ranked.best().map(|r| r.entry_id.as_str()), Some("high"));
    }

    #[test]
    fn test_handle_from_path_uses_file_name() {
        let h = ImageHandle::from_path("/srv/gallery/alice.jpg");
        assert_eq!(h.id, "alice.jpg");
        assert!(h.path().is_some());
    }

    #[test]
    fn test_bytes_handle_shares_buffer() {
        let h = ImageHandle::from_bytes("q.png", vec![1u8, 2, 3]);
        let a = h.read_bytes().unwrap();
        let b = h.read_bytes().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(h.path().is_none());
    }
}
