use facerank_core::{FaceEngine, GalleryEntry, Pipeline, PipelineError, Ranking};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot reported by `Status`.
pub struct EngineStatus {
    pub gallery_cached: bool,
    pub requests_served: u64,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Rank {
        image: Vec<u8>,
        filename: String,
        reply: oneshot::Sender<Result<Ranking, PipelineError>>,
    },
    Gallery {
        reply: oneshot::Sender<Result<Vec<GalleryEntry>, PipelineError>>,
    },
    Refresh {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Rank the gallery against an uploaded image.
    pub async fn rank(&self, image: Vec<u8>, filename: String) -> Result<Ranking, DaemonError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Rank { image, filename, reply }).await?;
        Ok(rx.await.map_err(|_| DaemonError::ChannelClosed)??)
    }

    /// The classified gallery.
    pub async fn gallery(&self) -> Result<Vec<GalleryEntry>, DaemonError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Gallery { reply }).await?;
        Ok(rx.await.map_err(|_| DaemonError::ChannelClosed)??)
    }

    /// Drop the cached gallery.
    pub async fn refresh(&self) -> Result<(), DaemonError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Refresh { reply }).await?;
        rx.await.map_err(|_| DaemonError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<EngineStatus, DaemonError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineRequest::Status { reply }).await?;
        rx.await.map_err(|_| DaemonError::ChannelClosed)
    }

    async fn send(&self, req: EngineRequest) -> Result<(), DaemonError> {
        self.tx.send(req).await.map_err(|_| DaemonError::ChannelClosed)
    }
}

/// Move the pipeline onto a dedicated OS thread and return a handle to it.
///
/// Engine calls block for the length of model inference, so they never run
/// on the async runtime. Requests are served one at a time in arrival order.
pub fn spawn_engine<E: FaceEngine + 'static>(
    pipeline: Pipeline<E>,
) -> Result<EngineHandle, DaemonError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("facerank-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut served = 0u64;
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Rank { image, filename, reply } => {
                        served += 1;
                        let _ = reply.send(pipeline.rank_bytes(&image, &filename));
                    }
                    EngineRequest::Gallery { reply } => {
                        let _ = reply.send(pipeline.gallery());
                    }
                    EngineRequest::Refresh { reply } => {
                        pipeline.refresh();
                        let _ = reply.send(());
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(EngineStatus {
                            gallery_cached: pipeline.gallery_cached(),
                            requests_served: served,
                        });
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(DaemonError::Spawn)?;

    Ok(EngineHandle { tx })
}
