use std::path::PathBuf;
use thiserror::Error;

/// Terminal failure of one ranking request.
///
/// Per-image problems (no face in a reference, a failed comparison) never
/// surface here; they are logged and the entry is left out of the results.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("face engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("gallery directory {path} unreadable: {source}")]
    GalleryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid query image: {0}")]
    InvalidQuery(String),
    #[error("failed to stage query image: {0}")]
    Staging(#[source] std::io::Error),
}
