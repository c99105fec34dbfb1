//! ArcFace face recognizer via ONNX Runtime.
//!
//! Crops the detected face with a small margin, resizes it to 112×112 and
//! extracts an L2-normalised 512-dimensional embedding.

use crate::detector::FaceBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
/// Extra context around the detection box, as a fraction of its size.
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the image")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from `model_path`.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Embed the face inside `face`.
    pub fn embed(&mut self, image: &RgbImage, face: &FaceBox) -> Result<Vec<f32>, RecognizerError> {
        let (x, y, w, h) =
            crop_rect(face, image.width(), image.height()).ok_or(RecognizerError::EmptyCrop)?;
        let crop = imageops::crop_imm(image, x, y, w, h).to_image();
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        Ok(l2_normalize(raw.to_vec()))
    }
}

/// Pixel rectangle `(x, y, width, height)` for `face` grown by
/// `CROP_MARGIN` and clamped to the image. `None` when nothing remains.
fn crop_rect(face: &FaceBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let mx = face.width() * CROP_MARGIN;
    let my = face.height() * CROP_MARGIN;
    let x1 = (face.x1 - mx).floor().clamp(0.0, width as f32) as u32;
    let y1 = (face.y1 - my).floor().clamp(0.0, height as f32) as u32;
    let x2 = (face.x2 + mx).ceil().clamp(0.0, width as f32) as u32;
    let y2 = (face.y2 + my).ceil().clamp(0.0, height as f32) as u32;
    (x2 > x1 && y2 > y1).then(|| (x1, y1, x2 - x1, y2 - y1))
}

/// Resize a face crop to the ArcFace input and normalise into NCHW.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let resized = imageops::resize(
        crop,
        ARCFACE_INPUT_SIZE,
        ARCFACE_INPUT_SIZE,
        FilterType::Triangle,
    );
    let side = ARCFACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    tensor
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// `1 - cos(a, b)`, in [0, 2]. Zero vectors are treated as orthogonal.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    let cosine = if denom > 0.0 { dot / denom } else { 0.0 };
    1.0 - cosine
}
