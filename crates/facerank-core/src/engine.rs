//! The face-matching engine seam.

use crate::types::ImageHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine cannot serve any request. Fatal for a whole ranking run.
    #[error("face engine unavailable: {0}")]
    Unavailable(String),
    #[error("no face detected")]
    NoFace,
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("comparison timed out after {0:?}")]
    Timeout(Duration),
}

impl EngineError {
    /// Whether this error concerns the engine itself rather than one image.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Unavailable(_))
    }
}

/// Face detection and pairwise face distance.
///
/// Both operations are blocking and may be slow. Implementations must not
/// consume or mutate the handles they are given: the same query handle is
/// passed to every comparison of a ranking run.
pub trait FaceEngine: Send + Sync {
    /// Whether `image` contains a detectable face.
    fn detect(&self, image: &ImageHandle) -> Result<bool, EngineError>;

    /// Distance between the faces in `a` and `b`; 0 means identical.
    fn compare(&self, a: &ImageHandle, b: &ImageHandle) -> Result<f32, EngineError>;

    /// Cheap liveness check run before a ranking starts.
    fn ready(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
