use crate::engine::{DaemonError, EngineHandle};
use facerank_core::report::{gallery_report, ranking_report};
use facerank_core::PipelineError;
use zbus::interface;

pub const BUS_NAME: &str = "org.freedesktop.FaceRank1";
pub const OBJECT_PATH: &str = "/org/freedesktop/FaceRank1";

/// D-Bus interface for the facerank daemon.
///
/// Bus name: org.freedesktop.FaceRank1
/// Object path: /org/freedesktop/FaceRank1
pub struct FaceRankService {
    engine: EngineHandle,
    gallery_dir: String,
}

impl FaceRankService {
    pub fn new(engine: EngineHandle, gallery_dir: String) -> Self {
        Self { engine, gallery_dir }
    }
}

#[interface(name = "org.freedesktop.FaceRank1")]
impl FaceRankService {
    /// Rank the reference gallery by similarity to the given image.
    /// Returns the ranking as JSON.
    async fn rank(&self, image: Vec<u8>, filename: &str) -> zbus::fdo::Result<String> {
        tracing::info!(filename, bytes = image.len(), "rank requested");
        let ranking = self
            .engine
            .rank(image, filename.to_string())
            .await
            .map_err(to_fdo)?;
        Ok(ranking_report(filename, &ranking).to_string())
    }

    /// List gallery images with their usability, as JSON.
    async fn gallery(&self) -> zbus::fdo::Result<String> {
        let entries = self.engine.gallery().await.map_err(to_fdo)?;
        Ok(gallery_report(&entries).to_string())
    }

    /// Forget the cached gallery so the next request rescans the directory.
    async fn refresh(&self) -> zbus::fdo::Result<()> {
        tracing::info!("refresh requested");
        self.engine.refresh().await.map_err(to_fdo)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "gallery_dir": self.gallery_dir,
            "gallery_cached": status.gallery_cached,
            "requests_served": status.requests_served,
        })
        .to_string())
    }
}

fn to_fdo(err: DaemonError) -> zbus::fdo::Error {
    tracing::warn!(error = %err, "request failed");
    match err {
        DaemonError::Pipeline(PipelineError::InvalidQuery(msg)) => {
            zbus::fdo::Error::InvalidArgs(msg)
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}
