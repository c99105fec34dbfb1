//! Scripted engine used by the unit tests.

use crate::engine::{EngineError, FaceEngine};
use crate::types::ImageHandle;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Copy)]
enum Detect {
    NoFace,
    Corrupt,
    Unavailable,
}

#[derive(Clone, Copy)]
enum Compare {
    Distance(f32),
    Fail,
    Unavailable,
    Slow(Duration, f32),
}

/// Fake engine whose answers are keyed by reference file name.
///
/// Unscripted references have a face and a distance of 0.5.
#[derive(Default)]
pub struct ScriptedEngine {
    detect: HashMap<String, Detect>,
    compare: HashMap<String, Compare>,
    down: bool,
    pub detect_calls: Mutex<Vec<String>>,
    pub compare_calls: Mutex<Vec<String>>,
    /// Query paths seen by `compare`, with whether the file existed then.
    pub query_paths: Mutex<Vec<(PathBuf, bool)>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_face(mut self, id: &str) -> Self {
        self.detect.insert(id.into(), Detect::NoFace);
        self
    }

    pub fn corrupt(mut self, id: &str) -> Self {
        self.detect.insert(id.into(), Detect::Corrupt);
        self
    }

    pub fn detect_unavailable(mut self, id: &str) -> Self {
        self.detect.insert(id.into(), Detect::Unavailable);
        self
    }

    pub fn distance(mut self, id: &str, distance: f32) -> Self {
        self.compare.insert(id.into(), Compare::Distance(distance));
        self
    }

    pub fn compare_fails(mut self, id: &str) -> Self {
        self.compare.insert(id.into(), Compare::Fail);
        self
    }

    pub fn compare_unavailable(mut self, id: &str) -> Self {
        self.compare.insert(id.into(), Compare::Unavailable);
        self
    }

    pub fn slow(mut self, id: &str, delay: Duration, distance: f32) -> Self {
        self.compare.insert(id.into(), Compare::Slow(delay, distance));
        self
    }

    /// Fail the readiness check.
    pub fn down(mut self) -> Self {
        self.down = true;
        self
    }

    pub fn compared(&self) -> Vec<String> {
        self.compare_calls.lock().unwrap().clone()
    }

    pub fn detected(&self) -> Vec<String> {
        self.detect_calls.lock().unwrap().clone()
    }
}

impl FaceEngine for ScriptedEngine {
    fn detect(&self, image: &ImageHandle) -> Result<bool, EngineError> {
        self.detect_calls.lock().unwrap().push(image.id.clone());
        match self.detect.get(&image.id) {
            None => Ok(true),
            Some(Detect::NoFace) => Ok(false),
            Some(Detect::Corrupt) => Err(EngineError::Decode("truncated file".into())),
            Some(Detect::Unavailable) => Err(EngineError::Unavailable("model unloaded".into())),
        }
    }

    fn compare(&self, a: &ImageHandle, b: &ImageHandle) -> Result<f32, EngineError> {
        self.compare_calls.lock().unwrap().push(b.id.clone());
        if let Some(p) = a.path() {
            self.query_paths
                .lock()
                .unwrap()
                .push((p.to_path_buf(), p.exists()));
        }
        match self.compare.get(&b.id) {
            None => Ok(0.5),
            Some(Compare::Distance(d)) => Ok(*d),
            Some(Compare::Fail) => Err(EngineError::Inference("no face in query".into())),
            Some(Compare::Unavailable) => Err(EngineError::Unavailable("model unloaded".into())),
            Some(Compare::Slow(delay, d)) => {
                std::thread::sleep(*delay);
                Ok(*d)
            }
        }
    }

    fn ready(&self) -> Result<(), EngineError> {
        if self.down {
            Err(EngineError::Unavailable("models not loaded".into()))
        } else {
            Ok(())
        }
    }
}

/// Create a gallery directory holding empty files with the given names.
pub fn gallery_with(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in names {
        std::fs::write(dir.path().join(name), b"img").unwrap();
    }
    dir
}
