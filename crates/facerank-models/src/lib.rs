//! facerank-models — ONNX-backed face-matching engine.
//!
//! SCRFD finds faces, ArcFace turns the best face into an embedding, and
//! two embeddings are compared by cosine distance.

pub mod detector;
pub mod engine;
pub mod recognizer;

pub use detector::{FaceBox, FaceDetector};
pub use engine::{ModelError, OnnxEngine, ARCFACE_MODEL_FILE, SCRFD_MODEL_FILE};
pub use recognizer::{cosine_distance, FaceRecognizer};
