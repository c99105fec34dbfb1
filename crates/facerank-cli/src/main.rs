use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facerank_core::report::{gallery_report, ranking_report};
use facerank_core::{BusKind, Config, Pipeline};
use facerank_models::OnnxEngine;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "facerank", about = "Rank a reference gallery by facial similarity to a photo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank gallery images by similarity to a photo
    Rank {
        /// Query image (png, jpg or jpeg)
        image: PathBuf,
        /// Run the models in this process instead of asking facerankd
        #[arg(long)]
        local: bool,
        /// Gallery directory (local mode only; overrides config)
        #[arg(long, requires = "local")]
        gallery: Option<PathBuf>,
        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
    },
    /// List gallery images and whether a face was found in each
    Gallery {
        #[arg(long)]
        local: bool,
        #[arg(long, requires = "local")]
        gallery: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Make the daemon rescan the gallery on the next request
    Refresh,
    /// Show daemon status
    Status,
}

#[zbus::proxy(
    interface = "org.freedesktop.FaceRank1",
    default_service = "org.freedesktop.FaceRank1",
    default_path = "/org/freedesktop/FaceRank1"
)]
trait FaceRank {
    fn rank(&self, image: &[u8], filename: &str) -> zbus::Result<String>;
    fn gallery(&self) -> zbus::Result<String>;
    fn refresh(&self) -> zbus::Result<()>;
    fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Rank { image, local, gallery, json } => {
            let report = if local {
                rank_local(config, gallery, &image)?
            } else {
                let bytes = std::fs::read(&image)
                    .with_context(|| format!("reading {}", image.display()))?;
                tracing::debug!(
                    image = %image.display(),
                    bytes = bytes.len(),
                    "sending query to facerankd"
                );
                let proxy = connect(config.bus).await?;
                serde_json::from_str(&proxy.rank(&bytes, &file_name(&image)).await?)?
            };
            if json {
                println!("{report:#}");
            } else {
                print_ranking(&report);
            }
        }
        Commands::Gallery { local, gallery, json } => {
            let report = if local {
                let pipeline = local_pipeline(config, gallery)?;
                gallery_report(&pipeline.gallery()?)
            } else {
                serde_json::from_str(&connect(config.bus).await?.gallery().await?)?
            };
            if json {
                println!("{report:#}");
            } else {
                print_gallery(&report);
            }
        }
        Commands::Refresh => {
            connect(config.bus).await?.refresh().await?;
            println!("gallery cache cleared");
        }
        Commands::Status => match connect(config.bus).await {
            Ok(proxy) => {
                let status: Value = serde_json::from_str(&proxy.status().await?)?;
                println!("{status:#}");
            }
            Err(err) => println!("facerankd: not connected ({err})"),
        },
    }

    Ok(())
}

async fn connect(bus: BusKind) -> Result<FaceRankProxy<'static>> {
    let conn = match bus {
        BusKind::Session => zbus::Connection::session().await?,
        BusKind::System => zbus::Connection::system().await?,
    };
    FaceRankProxy::new(&conn)
        .await
        .context("connecting to facerankd")
}

fn local_pipeline(mut config: Config, gallery: Option<PathBuf>) -> Result<Pipeline<OnnxEngine>> {
    if let Some(dir) = gallery {
        config.gallery_dir = dir;
    }
    let engine = OnnxEngine::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    Ok(Pipeline::new(Arc::new(engine), config.pipeline_config()?))
}

fn rank_local(config: Config, gallery: Option<PathBuf>, image: &Path) -> Result<Value> {
    if !facerank_core::gallery::is_image_name(&file_name(image)) {
        bail!("{} is not a png, jpg or jpeg image", image.display());
    }
    let pipeline = local_pipeline(config, gallery)?;
    tracing::debug!(
        image = %image.display(),
        gallery = %pipeline.config().gallery_dir.display(),
        "ranking in process"
    );
    let ranking = pipeline.rank_path(image)?;
    Ok(ranking_report(&file_name(image), &ranking))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn print_ranking(report: &Value) {
    let results = report["results"].as_array().map(Vec::as_slice).unwrap_or_default();
    if results.is_empty() {
        println!("{}", empty_message(report));
    }
    for (rank, r) in results.iter().enumerate() {
        println!(
            "{:>3}. {:<40} {:>7.4}",
            rank + 1,
            r["entry_id"].as_str().unwrap_or("?"),
            r["similarity"].as_f64().unwrap_or(f64::NAN)
        );
    }
    if let Some(failed) = report["failed"].as_array().filter(|f| !f.is_empty()) {
        println!("{} comparison(s) failed:", failed.len());
        for f in failed {
            println!(
                "     {}: {}",
                f["entry_id"].as_str().unwrap_or("?"),
                f["error"].as_str().unwrap_or("")
            );
        }
    }
}

/// Why a ranking came back without results.
fn empty_message(report: &Value) -> &'static str {
    let scanned = report["scanned"].as_u64().unwrap_or(0);
    let unusable = report["unusable"].as_u64().unwrap_or(0);
    let failed = report["failed"].as_array().map_or(0, Vec::len);
    if scanned == 0 {
        "No matches: the gallery has no images."
    } else if unusable >= scanned {
        "No matches: no face was found in any gallery image."
    } else if failed > 0 {
        "No matches: every comparison failed."
    } else {
        "No matches."
    }
}

fn print_gallery(report: &Value) {
    let entries = report.as_array().map(Vec::as_slice).unwrap_or_default();
    if entries.is_empty() {
        println!("Gallery is empty");
    }
    for e in entries {
        let mark = if e["usable"].as_bool().unwrap_or(false) { "ok  " } else { "skip" };
        println!("{mark} {}", e["entry_id"].as_str().unwrap_or("?"));
    }
}
