use anyhow::{Context, Result};
use facerank_core::{BusKind, Config, Pipeline};
use facerank_models::OnnxEngine;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod dbus_interface;
mod engine;

use dbus_interface::{FaceRankService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facerankd starting");
    let config = Config::load()?;

    if !config.gallery_dir.exists() {
        std::fs::create_dir_all(&config.gallery_dir).with_context(|| {
            format!("creating gallery directory {}", config.gallery_dir.display())
        })?;
        tracing::info!(dir = %config.gallery_dir.display(), "created empty gallery directory");
    }

    // Fail fast: without models every request would fail anyway.
    let model = OnnxEngine::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    let pipeline = Pipeline::new(Arc::new(model), config.pipeline_config()?);
    let handle = engine::spawn_engine(pipeline)?;

    let service = FaceRankService::new(handle, config.gallery_dir.display().to_string());
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering D-Bus service")?;

    tracing::info!(
        bus = ?config.bus,
        gallery = %config.gallery_dir.display(),
        "facerankd ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("facerankd shutting down");

    Ok(())
}
