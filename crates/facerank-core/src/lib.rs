//! facerank-core — Reference gallery matching pipeline.
//!
//! Filters a directory of reference photos down to those with a detectable
//! face, scores a query photo against each of them through a pluggable
//! [`FaceEngine`], and returns the references ranked best-match-first.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod gallery;
pub mod intake;
pub mod pipeline;
pub mod ranking;
pub mod report;
pub mod scorer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{BusKind, Config, ConfigError};
pub use engine::{EngineError, FaceEngine};
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineConfig};
pub use ranking::Ranking;
pub use scorer::ComparisonFailure;
pub use types::{GalleryEntry, ImageHandle, ImageSource, MatchResult, RankedResults};
