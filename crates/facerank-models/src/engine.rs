//! [`FaceEngine`] implementation backed by the SCRFD and ArcFace models.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{cosine_distance, FaceRecognizer, RecognizerError};
use facerank_core::{EngineError, FaceEngine, ImageHandle};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// SCRFD detection model file name inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("model directory {0} does not exist")]
    DirNotFound(PathBuf),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Face engine running both ONNX sessions in-process.
///
/// Sessions need exclusive access for inference, so each sits behind a
/// mutex; calls from several threads are serialised.
///
/// A ranking compares one query against every reference, so the embedding
/// of the last first-argument image is kept and reused while its bytes stay
/// the same. Each further comparison costs one detect and one embed.
pub struct OnnxEngine {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
    query: Mutex<EmbeddingMemo>,
}

/// Last query embedding, keyed by the encoded bytes it came from.
#[derive(Default)]
struct EmbeddingMemo {
    entry: Option<(Arc<[u8]>, Vec<f32>)>,
}

impl EmbeddingMemo {
    fn get(&self, bytes: &[u8]) -> Option<Vec<f32>> {
        match &self.entry {
            Some((key, embedding)) if **key == *bytes => Some(embedding.clone()),
            _ => None,
        }
    }

    fn put(&mut self, bytes: Arc<[u8]>, embedding: Vec<f32>) {
        self.entry = Some((bytes, embedding));
    }
}

impl OnnxEngine {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, ModelError> {
        if !model_dir.is_dir() {
            return Err(ModelError::DirNotFound(model_dir.to_path_buf()));
        }
        let detector = FaceDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        tracing::info!(dir = %model_dir.display(), "face engine ready");

        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
            query: Mutex::new(EmbeddingMemo::default()),
        })
    }

    /// Embedding of the highest-scoring face in `image`.
    fn embed(&self, image: &ImageHandle) -> Result<Vec<f32>, EngineError> {
        self.embed_rgb(&decode(image)?)
    }

    /// Like [`Self::embed`], reusing the memoized embedding when `image`
    /// holds the same bytes as the previous query.
    fn embed_query(&self, image: &ImageHandle) -> Result<Vec<f32>, EngineError> {
        let bytes = image.read_bytes()?;
        if let Some(embedding) = lock(&self.query)?.get(&bytes) {
            tracing::trace!(image = %image.id, "query embedding reused");
            return Ok(embedding);
        }
        let embedding = self.embed_rgb(&decode_bytes(&image.id, &bytes)?)?;
        lock(&self.query)?.put(bytes, embedding.clone());
        Ok(embedding)
    }

    fn embed_rgb(&self, rgb: &RgbImage) -> Result<Vec<f32>, EngineError> {
        let faces = lock(&self.detector)?
            .detect(rgb)
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        let face = faces.first().ok_or(EngineError::NoFace)?;
        lock(&self.recognizer)?
            .embed(rgb, face)
            .map_err(|e| EngineError::Inference(e.to_string()))
    }
}

impl FaceEngine for OnnxEngine {
    fn detect(&self, image: &ImageHandle) -> Result<bool, EngineError> {
        let rgb = decode(image)?;
        let faces = lock(&self.detector)?
            .detect(&rgb)
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        tracing::debug!(image = %image.id, faces = faces.len(), "detect");
        Ok(!faces.is_empty())
    }

    fn compare(&self, a: &ImageHandle, b: &ImageHandle) -> Result<f32, EngineError> {
        let ea = self.embed_query(a)?;
        let eb = self.embed(b)?;
        Ok(cosine_distance(&ea, &eb))
    }

    fn ready(&self) -> Result<(), EngineError> {
        let poisoned = self.detector.is_poisoned()
            || self.recognizer.is_poisoned()
            || self.query.is_poisoned();
        if poisoned {
            return Err(EngineError::Unavailable(
                "an inference session panicked earlier".into(),
            ));
        }
        Ok(())
    }
}

/// A panic mid-inference leaves the session in an unknown state, so a
/// poisoned lock means the engine is gone rather than this one image.
fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, EngineError> {
    m.lock()
        .map_err(|_| EngineError::Unavailable("inference session poisoned".into()))
}

/// Decode the bytes behind `image` into RGB.
pub(crate) fn decode(image: &ImageHandle) -> Result<RgbImage, EngineError> {
    decode_bytes(&image.id, &image.read_bytes()?)
}

fn decode_bytes(id: &str, bytes: &[u8]) -> Result<RgbImage, EngineError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| EngineError::Decode(format!("{id}: {e}")))?;
    Ok(decoded.to_rgb8())
}
