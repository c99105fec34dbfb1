//! End-to-end ranking of one query photo against the reference gallery.

use crate::cache::GalleryCache;
use crate::engine::FaceEngine;
use crate::error::PipelineError;
use crate::gallery::GalleryValidator;
use crate::intake::{check_upload, QueryMode, StagedQuery, DEFAULT_MAX_UPLOAD_BYTES};
use crate::ranking::{Aggregator, Ranking};
use crate::scorer::Scorer;
use crate::types::{GalleryEntry, ImageHandle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Tunables for a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory of reference images.
    pub gallery_dir: PathBuf,
    /// Where staged query files are created (system temp dir when `None`).
    pub staging_dir: Option<PathBuf>,
    pub query_mode: QueryMode,
    /// Per-comparison timeout; `None` waits for the engine indefinitely.
    pub compare_timeout: Option<Duration>,
    /// Cap on the number of gallery images examined per scan.
    pub max_gallery_size: Option<usize>,
    pub max_upload_bytes: usize,
    /// Return only the best `k` results.
    pub top_k: Option<usize>,
    /// Reuse the validated gallery until the directory changes.
    pub cache_gallery: bool,
}

impl PipelineConfig {
    pub fn new(gallery_dir: impl Into<PathBuf>) -> Self {
        Self {
            gallery_dir: gallery_dir.into(),
            staging_dir: None,
            query_mode: QueryMode::TempFile,
            compare_timeout: None,
            max_gallery_size: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            top_k: None,
            cache_gallery: true,
        }
    }
}

/// Validator, scorer and aggregator wired to one engine and one gallery.
pub struct Pipeline<E> {
    engine: Arc<E>,
    config: PipelineConfig,
    validator: GalleryValidator,
    aggregator: Aggregator<E>,
    cache: GalleryCache,
}

impl<E: FaceEngine + 'static> Pipeline<E> {
    pub fn new(engine: Arc<E>, config: PipelineConfig) -> Self {
        let scorer = Scorer::new(Arc::clone(&engine)).with_timeout(config.compare_timeout);
        Self {
            validator: GalleryValidator::with_limit(config.max_gallery_size),
            aggregator: Aggregator::new(scorer).with_top_k(config.top_k),
            cache: GalleryCache::new(),
            engine,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Whether a validated gallery is currently cached.
    pub fn gallery_cached(&self) -> bool {
        self.cache.is_warm()
    }

    /// The classified gallery, from cache when the directory is unchanged.
    pub fn gallery(&self) -> Result<Vec<GalleryEntry>, PipelineError> {
        self.check_ready()?;
        self.scan()
    }

    /// Forget the cached gallery so the next request rescans it.
    pub fn refresh(&self) {
        self.cache.invalidate();
        tracing::info!(dir = %self.config.gallery_dir.display(), "gallery cache invalidated");
    }

    /// Rank uploaded query bytes. `filename` is advisory.
    ///
    /// The staged query is released before this returns, whatever the outcome.
    pub fn rank_bytes(&self, bytes: &[u8], filename: &str) -> Result<Ranking, PipelineError> {
        check_upload(bytes, filename, self.config.max_upload_bytes)?;
        self.check_ready()?;

        let staged = StagedQuery::stage(
            bytes,
            filename,
            self.config.query_mode,
            self.config.staging_dir.as_deref(),
        )?;
        let ranking = self.rank_handle(staged.handle());
        if let Err(err) = staged.close() {
            tracing::error!(error = %err, "staged query could not be removed");
        }
        ranking
    }

    /// Rank a query image that already lives on disk.
    pub fn rank_path(&self, path: &Path) -> Result<Ranking, PipelineError> {
        if !path.is_file() {
            return Err(PipelineError::InvalidQuery(format!(
                "{} is not a readable file",
                path.display()
            )));
        }
        self.check_ready()?;
        self.rank_handle(&ImageHandle::from_path(path))
    }

    fn rank_handle(&self, query: &ImageHandle) -> Result<Ranking, PipelineError> {
        let entries = self.scan()?;
        self.aggregator.rank(query, &entries)
    }

    fn scan(&self) -> Result<Vec<GalleryEntry>, PipelineError> {
        let dir = &self.config.gallery_dir;
        if self.config.cache_gallery {
            self.cache.get_or_validate(&*self.engine, &self.validator, dir)
        } else {
            self.validator.validate(&*self.engine, dir)
        }
    }

    fn check_ready(&self) -> Result<(), PipelineError> {
        self.engine
            .ready()
            .map_err(|e| PipelineError::EngineUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{gallery_with, ScriptedEngine};

    struct Fixture {
        gallery: tempfile::TempDir,
        staging: tempfile::TempDir,
        engine: Arc<ScriptedEngine>,
        pipeline: Pipeline<ScriptedEngine>,
    }

    fn fixture(names: &[&str], engine: ScriptedEngine, cache: bool) -> Fixture {
        let gallery = gallery_with(names);
        let staging = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine);
        let mut config = PipelineConfig::new(gallery.path());
        config.staging_dir = Some(staging.path().to_path_buf());
        config.cache_gallery = cache;
        let pipeline = Pipeline::new(Arc::clone(&engine), config);
        Fixture {
            gallery,
            staging,
            engine,
            pipeline,
        }
    }

    fn ids(ranking: &Ranking) -> Vec<String> {
        ranking.results.iter().map(|r| r.entry_id.clone()).collect()
    }

    fn staged_count(f: &Fixture) -> usize {
        std::fs::read_dir(f.staging.path()).unwrap().count()
    }

    #[test]
    fn test_rank_upload_end_to_end() {
        let f = fixture(
            &["alice.jpg", "bob.png", "carol.jpeg", "notes.txt"],
            ScriptedEngine::new()
                .distance("alice.jpg", 0.7)
                .distance("bob.png", 0.2)
                .no_face("carol.jpeg"),
            true,
        );
        let ranking = f.pipeline.rank_bytes(b"query", "me.jpg").unwrap();

        assert_eq!(ids(&ranking), ["bob.png", "alice.jpg"]);
        assert_eq!(ranking.scanned, 3);
        assert_eq!(ranking.unusable, 1);
        assert_eq!(staged_count(&f), 0);
    }

    #[test]
    fn test_corrupt_reference_does_not_abort() {
        let f = fixture(
            &["a.jpg", "b.jpg", "c.jpg"],
            ScriptedEngine::new().corrupt("b.jpg"),
            false,
        );
        let ranking = f.pipeline.rank_bytes(b"query", "me.jpg").unwrap();
        assert_eq!(ids(&ranking), ["a.jpg", "c.jpg"]);
    }

    #[test]
    fn test_empty_gallery_is_not_an_error() {
        let f = fixture(&["readme.md"], ScriptedEngine::new(), true);
        let ranking = f.pipeline.rank_bytes(b"query", "me.png").unwrap();
        assert!(ranking.results.is_empty());
    }

    #[test]
    fn test_all_unusable() {
        let f = fixture(
            &["a.jpg", "b.jpg", "c.jpg"],
            ScriptedEngine::new()
                .no_face("a.jpg")
                .no_face("b.jpg")
                .no_face("c.jpg"),
            true,
        );
        let ranking = f.pipeline.rank_bytes(b"query", "me.jpg").unwrap();
        assert!(ranking.results.is_empty());
        assert!(f.engine.compared().is_empty());
    }

    #[test]
    fn test_idempotent_ordering() {
        for cache in [true, false] {
            let f = fixture(
                &["d.jpg", "a.jpg", "c.jpg", "b.jpg"],
                ScriptedEngine::new()
                    .distance("a.jpg", 0.3)
                    .distance("b.jpg", 0.3)
                    .distance("c.jpg", 0.1)
                    .distance("d.jpg", 0.9),
                cache,
            );
            let first = f.pipeline.rank_bytes(b"query", "me.jpg").unwrap();
            let second = f.pipeline.rank_bytes(b"query", "me.jpg").unwrap();
            assert_eq!(ids(&first), ids(&second));
            assert_eq!(ids(&first), ["c.jpg", "a.jpg", "b.jpg", "d.jpg"]);
        }
    }

    #[test]
    fn test_tie_break_follows_scan_order() {
        let f = fixture(
            &["zed.jpg", "amy.jpg"],
            ScriptedEngine::new()
                .distance("zed.jpg", 0.58)
                .distance("amy.jpg", 0.58),
            true,
        );
        let ranking = f.pipeline.rank_bytes(b"query", "me.jpg").unwrap();
        assert_eq!(ids(&ranking), ["amy.jpg", "zed.jpg"]);
    }

    #[test]
    fn test_cleanup_when_every_comparison_fails() {
        let f = fixture(
            &["a.jpg", "b.jpg", "c.jpg"],
            ScriptedEngine::new()
                .compare_fails("a.jpg")
                .compare_fails("b.jpg")
                .compare_fails("c.jpg"),
            true,
        );
        let ranking = f.pipeline.rank_bytes(b"query", "me.jpg").unwrap();
        assert!(ranking.results.is_empty());
        assert_eq!(ranking.failures.len(), 3);

        // One staged file, present for every comparison, gone afterwards.
        let seen = f.engine.query_paths.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(p, existed)| *existed && p == &seen[0].0));
        assert!(!seen[0].0.exists());
        assert_eq!(staged_count(&f), 0);
    }

    #[test]
    fn test_cleanup_when_engine_fails_mid_run() {
        let f = fixture(
            &["a.jpg", "b.jpg"],
            ScriptedEngine::new().compare_unavailable("b.jpg"),
            true,
        );
        let err = f.pipeline.rank_bytes(b"query", "me.jpg").unwrap_err();
        assert!(matches!(err, PipelineError::EngineUnavailable(_)));
        assert_eq!(staged_count(&f), 0);
    }

    #[test]
    fn test_cleanup_when_gallery_missing() {
        let f = fixture(&[], ScriptedEngine::new(), true);
        let mut config = f.pipeline.config().clone();
        config.gallery_dir = f.gallery.path().join("missing");
        let pipeline = Pipeline::new(Arc::clone(&f.engine), config);

        let err = pipeline.rank_bytes(b"query", "me.jpg").unwrap_err();
        assert!(matches!(err, PipelineError::GalleryUnreadable { .. }));
        assert_eq!(staged_count(&f), 0);
    }

    #[test]
    fn test_engine_down_fails_before_staging() {
        let f = fixture(&["a.jpg"], ScriptedEngine::new().down(), true);
        let err = f.pipeline.rank_bytes(b"query", "me.jpg").unwrap_err();
        assert!(matches!(err, PipelineError::EngineUnavailable(_)));
        assert!(f.engine.detected().is_empty());
        assert_eq!(staged_count(&f), 0);
    }

    #[test]
    fn test_invalid_upload_rejected() {
        let f = fixture(&["a.jpg"], ScriptedEngine::new(), true);
        let err = f.pipeline.rank_bytes(b"query", "me.gif").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidQuery(_)));
        assert!(f.engine.detected().is_empty());
    }

    #[test]
    fn test_in_memory_query() {
        let f = fixture(&["a.jpg"], ScriptedEngine::new().distance("a.jpg", 0.25), true);
        let mut config = f.pipeline.config().clone();
        config.query_mode = QueryMode::InMemory;
        let pipeline = Pipeline::new(Arc::clone(&f.engine), config);

        let ranking = pipeline.rank_bytes(b"query", "me.jpg").unwrap();
        assert_eq!(ids(&ranking), ["a.jpg"]);
        assert!(f.engine.query_paths.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rank_path() {
        let f = fixture(&["a.jpg", "b.jpg"], ScriptedEngine::new().distance("b.jpg", 0.0), true);
        let query = f.staging.path().join("me.jpg");
        std::fs::write(&query, b"query").unwrap();

        let ranking = f.pipeline.rank_path(&query).unwrap();
        assert_eq!(ids(&ranking), ["b.jpg", "a.jpg"]);
        assert!(query.exists());

        let missing = f.staging.path().join("nope.jpg");
        assert!(matches!(
            f.pipeline.rank_path(&missing),
            Err(PipelineError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_gallery_cached_until_refresh() {
        let f = fixture(&["a.jpg", "b.jpg"], ScriptedEngine::new(), true);
        f.pipeline.rank_bytes(b"query", "me.jpg").unwrap();
        f.pipeline.rank_bytes(b"query", "me.jpg").unwrap();
        assert_eq!(f.engine.detected().len(), 2);
        assert!(f.pipeline.gallery_cached());

        f.pipeline.refresh();
        let gallery = f.pipeline.gallery().unwrap();
        assert_eq!(gallery.len(), 2);
        assert_eq!(f.engine.detected().len(), 4);
    }
}
